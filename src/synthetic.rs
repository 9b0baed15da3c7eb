//! Synthetic book records for the demo collection

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::column::Column;

pub const BOOK_ID: &str = "book_id";
pub const WORD_COUNT: &str = "word_count";
pub const BOOK_INTRO: &str = "book_intro";

/// Generated records in column form.
#[derive(Debug, Clone, PartialEq)]
pub struct BookBatch {
    pub book_ids: Vec<i64>,
    pub word_counts: Vec<i64>,
    pub intros: Vec<Vec<f32>>,
    pub dim: usize,
}

/// Generate `rows` books: ids `0..rows`, word counts `base..base + rows`,
/// and intro vectors drawn uniformly from `[0, 1)`.
///
/// The same seed always yields the same vectors.
pub fn generate_books(rows: usize, dim: usize, word_count_base: i64, seed: Option<u64>) -> BookBatch {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let matrix = Array2::<f32>::random_using((rows, dim), Uniform::new(0.0, 1.0), &mut rng);

    BookBatch {
        book_ids: (0..rows as i64).collect(),
        word_counts: (0..rows as i64).map(|i| i + word_count_base).collect(),
        intros: matrix.outer_iter().map(|row| row.to_vec()).collect(),
        dim,
    }
}

impl BookBatch {
    pub fn len(&self) -> usize {
        self.book_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.book_ids.is_empty()
    }

    /// Word count recorded for a book id, if the batch holds it.
    pub fn word_count_of(&self, book_id: i64) -> Option<i64> {
        self.book_ids
            .iter()
            .position(|&id| id == book_id)
            .map(|i| self.word_counts[i])
    }

    pub fn into_columns(self) -> Vec<Column> {
        vec![
            Column::int64(BOOK_ID, self.book_ids),
            Column::int64(WORD_COUNT, self.word_counts),
            Column::float_vector(BOOK_INTRO, self.dim, self.intros),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_ranges() {
        let batch = generate_books(2_000, 2, 10_000, Some(7));
        assert_eq!(batch.len(), 2_000);
        assert_eq!(batch.book_ids[0], 0);
        assert_eq!(batch.word_counts[0], 10_000);
        assert_eq!(*batch.word_counts.last().unwrap(), 11_999);
        assert!(batch.intros.iter().all(|v| v.len() == 2));
        assert!(batch
            .intros
            .iter()
            .flatten()
            .all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = generate_books(10, 4, 0, Some(42));
        let b = generate_books(10, 4, 0, Some(42));
        let c = generate_books(10, 4, 0, Some(43));
        assert_eq!(a, b);
        assert_ne!(a.intros, c.intros);
    }

    #[test]
    fn test_columns() {
        let batch = generate_books(3, 2, 10_000, Some(1));
        assert_eq!(batch.word_count_of(2), Some(10_002));
        assert_eq!(batch.word_count_of(3), None);

        let columns = batch.into_columns();
        let names: Vec<&str> = columns.iter().map(Column::name).collect();
        assert_eq!(names, vec![BOOK_ID, WORD_COUNT, BOOK_INTRO]);
        assert!(columns.iter().all(|c| c.len() == 3));
    }

    #[test]
    fn test_empty_batch() {
        let batch = generate_books(0, 2, 10_000, None);
        assert!(batch.is_empty());
        assert!(batch.into_columns().iter().all(Column::is_empty));
    }
}
