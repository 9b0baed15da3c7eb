//! In-memory collection storage backing the development server.
//!
//! Search is brute force over every row in the selected partitions; the
//! requested index spec is recorded and validated but no ANN structure is
//! built.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::api::{
    CollectionDescription, CollectionStats, DescribedField, DescribedIndex, Hit,
    IndexDescription, IndexParam, IndexState, InsertResponse, LoadState, SearchBody,
    DEFAULT_PARTITION,
};
use crate::column::{validate_row, FieldValue, Row};
use crate::distance::MetricType;
use crate::error::{Result, WorkflowError};
use crate::expr::Expr;
use crate::index::IndexSpec;
use crate::schema::{validate_name, CollectionSchema};

#[derive(Debug)]
struct Collection {
    schema: CollectionSchema,
    shards_num: u32,
    /// Partition name -> rows keyed by primary key
    partitions: BTreeMap<String, BTreeMap<i64, Row>>,
    /// Vector field -> index request
    indexes: BTreeMap<String, IndexParam>,
    loaded: bool,
    next_auto_id: i64,
}

impl Collection {
    fn num_entities(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    fn resolve_partition(&self, name: &str, partition: &str) -> Result<String> {
        let partition = if partition.is_empty() {
            DEFAULT_PARTITION
        } else {
            partition
        };
        if self.partitions.contains_key(partition) {
            Ok(partition.to_string())
        } else {
            Err(WorkflowError::PartitionNotFound {
                collection: name.to_string(),
                partition: partition.to_string(),
            })
        }
    }
}

/// Every collection the service knows about.
#[derive(Debug, Default)]
pub struct CollectionStore {
    collections: HashMap<String, Collection>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| WorkflowError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| WorkflowError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    /// Collection names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn create(&mut self, name: &str, mut schema: CollectionSchema, shards_num: u32) -> Result<()> {
        schema.collection_name = name.to_string();
        schema.validate()?;
        if shards_num == 0 {
            return Err(WorkflowError::InvalidSchema {
                reason: "shards_num must be at least 1".to_string(),
            });
        }
        if self.has(name) {
            return Err(WorkflowError::CollectionAlreadyExists {
                name: name.to_string(),
            });
        }

        let mut partitions = BTreeMap::new();
        partitions.insert(DEFAULT_PARTITION.to_string(), BTreeMap::new());
        self.collections.insert(
            name.to_string(),
            Collection {
                schema,
                shards_num,
                partitions,
                indexes: BTreeMap::new(),
                loaded: false,
                next_auto_id: 1,
            },
        );
        Ok(())
    }

    pub fn describe(&self, name: &str) -> Result<CollectionDescription> {
        let c = self.get(name)?;
        Ok(CollectionDescription {
            collection_name: name.to_string(),
            description: c.schema.description.clone(),
            fields: c.schema.fields.iter().map(DescribedField::from).collect(),
            indexes: c
                .indexes
                .values()
                .map(|i| DescribedIndex {
                    field_name: i.field_name.clone(),
                    index_name: i.index_name.clone(),
                    metric_type: i.metric_type,
                })
                .collect(),
            load: self.load_state(name),
            partitions_num: c.partitions.len(),
            shards_num: c.shards_num,
        })
    }

    pub fn stats(&self, name: &str) -> Result<CollectionStats> {
        Ok(CollectionStats {
            row_count: self.get(name)?.num_entities(),
        })
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<()> {
        self.collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WorkflowError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    pub fn create_partition(&mut self, name: &str, partition: &str) -> Result<()> {
        validate_name("partition", partition)?;
        let c = self.get_mut(name)?;
        if c.partitions.contains_key(partition) {
            return Err(WorkflowError::PartitionAlreadyExists {
                collection: name.to_string(),
                partition: partition.to_string(),
            });
        }
        c.partitions.insert(partition.to_string(), BTreeMap::new());
        Ok(())
    }

    pub fn has_partition(&self, name: &str, partition: &str) -> Result<bool> {
        Ok(self.get(name)?.partitions.contains_key(partition))
    }

    /// Partition names, sorted.
    pub fn list_partitions(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.get(name)?.partitions.keys().cloned().collect())
    }

    /// Record an index request. Re-issuing an identical request is a no-op;
    /// a different one on an indexed field is rejected.
    pub fn create_index(&mut self, name: &str, param: IndexParam) -> Result<()> {
        let c = self.get_mut(name)?;
        let field = c
            .schema
            .field(&param.field_name)
            .ok_or_else(|| WorkflowError::UnknownField {
                field: param.field_name.clone(),
            })?;
        if !field.is_vector() {
            return Err(WorkflowError::InvalidIndex {
                reason: format!("{} is not a vector field", param.field_name),
            });
        }
        IndexSpec::from_wire(&param.index_type, param.metric_type, &param.params)?;

        match c.indexes.get(&param.field_name) {
            Some(existing) if *existing == param => Ok(()),
            Some(_) => Err(WorkflowError::InvalidIndex {
                reason: format!("{} already has a different index", param.field_name),
            }),
            None => {
                c.indexes.insert(param.field_name.clone(), param);
                Ok(())
            }
        }
    }

    pub fn describe_index(&self, name: &str, index_name: &str) -> Result<Vec<IndexDescription>> {
        let c = self.get(name)?;
        Ok(c.indexes
            .values()
            .filter(|i| index_name.is_empty() || i.index_name == index_name)
            .map(|i| IndexDescription {
                field_name: i.field_name.clone(),
                index_name: i.index_name.clone(),
                index_type: i.index_type.clone(),
                metric_type: i.metric_type,
                index_state: IndexState::Finished,
                fail_reason: String::new(),
            })
            .collect())
    }

    /// Insert rows, replacing any existing row with the same primary key.
    pub fn insert(&mut self, name: &str, partition: &str, rows: Vec<Row>) -> Result<InsertResponse> {
        let c = self.get_mut(name)?;
        let partition = c.resolve_partition(name, partition)?;
        let pk = c
            .schema
            .primary_field()
            .cloned()
            .ok_or_else(|| WorkflowError::StorageError("collection has no primary key".to_string()))?;

        for row in &rows {
            validate_row(&c.schema, row)?;
        }

        let mut ids = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = if pk.auto_id {
                let id = c.next_auto_id;
                c.next_auto_id += 1;
                row.insert(pk.field_name.clone(), FieldValue::Int64(id));
                id
            } else {
                row.get(&pk.field_name)
                    .and_then(FieldValue::as_i64)
                    .ok_or_else(|| WorkflowError::MissingField {
                        field: pk.field_name.clone(),
                    })?
            };
            for rows in c.partitions.values_mut() {
                rows.remove(&id);
            }
            if let Some(rows) = c.partitions.get_mut(&partition) {
                rows.insert(id, row);
            }
            ids.push(id);
        }

        Ok(InsertResponse {
            insert_count: ids.len(),
            insert_ids: ids,
        })
    }

    /// Mark a collection loaded. Every vector field needs an index first.
    pub fn load(&mut self, name: &str) -> Result<()> {
        let c = self.get_mut(name)?;
        if let Some(missing) = c
            .schema
            .vector_fields()
            .find(|f| !c.indexes.contains_key(&f.field_name))
        {
            return Err(WorkflowError::InvalidIndex {
                reason: format!("no index on {}; create one before loading", missing.field_name),
            });
        }
        c.loaded = true;
        Ok(())
    }

    pub fn release(&mut self, name: &str) -> Result<()> {
        self.get_mut(name)?.loaded = false;
        Ok(())
    }

    pub fn load_state(&self, name: &str) -> LoadState {
        match self.collections.get(name) {
            None => LoadState::LoadStateNotExist,
            Some(c) if c.loaded => LoadState::LoadStateLoaded,
            Some(_) => LoadState::LoadStateNotLoad,
        }
    }

    /// Brute-force k-NN per query vector, ascending by distance.
    pub fn search(&self, req: &SearchBody) -> Result<Vec<Vec<Hit>>> {
        let name = &req.collection_name;
        let c = self.get(name)?;
        if !c.loaded {
            return Err(WorkflowError::CollectionNotLoaded { name: name.clone() });
        }

        let field = c
            .schema
            .field(&req.anns_field)
            .filter(|f| f.is_vector())
            .ok_or_else(|| WorkflowError::InvalidSearch {
                reason: format!("{} is not a vector field", req.anns_field),
            })?;
        let dim = field.dim().unwrap_or_default();

        if let Some(index) = c.indexes.get(&req.anns_field) {
            if index.metric_type != req.search_params.metric_type {
                return Err(WorkflowError::InvalidSearch {
                    reason: format!(
                        "metric {} does not match index metric {}",
                        req.search_params.metric_type, index.metric_type
                    ),
                });
            }
        }
        if req.limit == 0 {
            return Err(WorkflowError::InvalidSearch {
                reason: "limit must be at least 1".to_string(),
            });
        }
        for output in &req.output_fields {
            if c.schema.field(output).is_none() {
                return Err(WorkflowError::UnknownField {
                    field: output.clone(),
                });
            }
        }

        let filter = if req.filter.trim().is_empty() {
            None
        } else {
            let expr = Expr::parse(&req.filter)?;
            expr.check_fields(&c.schema)?;
            Some(expr)
        };

        // A partition named twice is still searched once
        let partitions: Vec<&BTreeMap<i64, Row>> = if req.partition_names.is_empty() {
            c.partitions.values().collect()
        } else {
            req.partition_names
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|p| {
                    c.partitions
                        .get(p)
                        .ok_or_else(|| WorkflowError::PartitionNotFound {
                            collection: name.clone(),
                            partition: p.clone(),
                        })
                })
                .collect::<Result<_>>()?
        };

        let candidates: Vec<(&i64, &Row)> = partitions
            .iter()
            .flat_map(|rows| rows.iter())
            .filter(|(_, row)| {
                filter.as_ref().map_or(true, |expr| {
                    expr.evaluate(&|f: &str| row.get(f).and_then(FieldValue::as_i64))
                })
            })
            .collect();

        req.data
            .iter()
            .map(|query| {
                if query.len() != dim {
                    return Err(WorkflowError::DimensionMismatch {
                        field: req.anns_field.clone(),
                        expected: dim,
                        actual: query.len(),
                    });
                }
                nearest(
                    &candidates,
                    query,
                    &req.anns_field,
                    req.search_params.metric_type,
                    req.limit,
                    &req.output_fields,
                )
            })
            .collect()
    }
}

fn nearest(
    candidates: &[(&i64, &Row)],
    query: &[f32],
    field: &str,
    metric: MetricType,
    k: usize,
    output_fields: &[String],
) -> Result<Vec<Hit>> {
    let mut scored: Vec<(i64, f32, &Row)> = candidates
        .iter()
        .filter_map(|&(id, row)| {
            row.get(field)
                .and_then(FieldValue::as_vector)
                .map(|v| (*id, v, row))
        })
        .map(|(id, v, row)| metric.distance(query, v).map(|d| (id, d, row)))
        .collect::<Result<Vec<_>>>()?;

    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);

    Ok(scored
        .into_iter()
        .map(|(id, distance, row)| Hit {
            id,
            distance,
            fields: output_fields
                .iter()
                .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SearchParamsBody;
    use crate::column::{to_rows, Column};
    use crate::index::SearchParams;
    use crate::schema::FieldSchema;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn books() -> CollectionSchema {
        CollectionSchema::new("books", "Test book search")
            .with_field(FieldSchema::int64("book_id").primary())
            .with_field(FieldSchema::int64("word_count"))
            .with_field(FieldSchema::float_vector("book_intro", 2))
    }

    fn ivf_param() -> IndexParam {
        let spec = IndexSpec::ivf_flat(MetricType::L2, 1024).unwrap();
        IndexParam {
            field_name: "book_intro".to_string(),
            index_name: "book_intro".to_string(),
            metric_type: spec.metric,
            index_type: spec.index_type.name().to_string(),
            params: spec.params(),
        }
    }

    fn rows(vectors: &[[f32; 2]]) -> Vec<Row> {
        let n = vectors.len() as i64;
        to_rows(&[
            Column::int64("book_id", (0..n).collect()),
            Column::int64("word_count", (0..n).map(|i| i + 10_000).collect()),
            Column::float_vector("book_intro", 2, vectors.iter().map(|v| v.to_vec()).collect()),
        ])
    }

    fn loaded_store(vectors: &[[f32; 2]]) -> CollectionStore {
        let mut store = CollectionStore::new();
        store.create("books", books(), 2).unwrap();
        store.create_index("books", ivf_param()).unwrap();
        store.insert("books", "", rows(vectors)).unwrap();
        store.load("books").unwrap();
        store
    }

    fn query(vector: [f32; 2], limit: usize, filter: &str) -> SearchBody {
        SearchBody {
            collection_name: "books".to_string(),
            data: vec![vector.to_vec()],
            anns_field: "book_intro".to_string(),
            limit,
            filter: filter.to_string(),
            output_fields: vec!["word_count".to_string()],
            partition_names: vec![],
            search_params: SearchParamsBody {
                metric_type: MetricType::L2,
                params: SearchParams::default().params(),
            },
        }
    }

    #[test]
    fn test_create_is_not_silent_on_duplicates() {
        let mut store = CollectionStore::new();
        store.create("books", books(), 2).unwrap();
        assert!(matches!(
            store.create("books", books(), 2),
            Err(WorkflowError::CollectionAlreadyExists { .. })
        ));
        assert_eq!(store.list(), vec!["books".to_string()]);
    }

    #[test]
    fn test_describe_and_drop() {
        let store = loaded_store(&[[0.0, 0.0], [1.0, 1.0]]);
        let desc = store.describe("books").unwrap();
        assert_eq!(desc.partitions_num, 1);
        assert_eq!(desc.load, LoadState::LoadStateLoaded);
        assert_eq!(desc.schema(), books());
        assert_eq!(desc.indexes[0].field_name, "book_intro");
        assert_eq!(store.stats("books").unwrap().row_count, 2);
        assert_eq!(
            store.list_partitions("books").unwrap(),
            vec![DEFAULT_PARTITION.to_string()]
        );

        let mut store = store;
        store.drop_collection("books").unwrap();
        assert_eq!(store.load_state("books"), LoadState::LoadStateNotExist);
        assert!(store.drop_collection("books").is_err());
    }

    #[test]
    fn test_load_requires_index() {
        let mut store = CollectionStore::new();
        store.create("books", books(), 2).unwrap();
        assert!(matches!(store.load("books"), Err(WorkflowError::InvalidIndex { .. })));
        store.create_index("books", ivf_param()).unwrap();
        store.load("books").unwrap();
        assert_eq!(store.load_state("books"), LoadState::LoadStateLoaded);
    }

    #[test]
    fn test_index_rules() {
        let mut store = CollectionStore::new();
        store.create("books", books(), 2).unwrap();
        store.create_index("books", ivf_param()).unwrap();
        store.create_index("books", ivf_param()).unwrap();

        let mut other = ivf_param();
        other.metric_type = MetricType::IP;
        assert!(store.create_index("books", other).is_err());

        let mut scalar = ivf_param();
        scalar.field_name = "word_count".to_string();
        assert!(store.create_index("books", scalar).is_err());

        let described = store.describe_index("books", "book_intro").unwrap();
        assert_eq!(described.len(), 1);
        assert_eq!(described[0].index_state, IndexState::Finished);
    }

    #[test]
    fn test_search_requires_load() {
        let mut store = loaded_store(&[[0.0, 0.0]]);
        store.release("books").unwrap();
        assert!(matches!(
            store.search(&query([0.1, 0.2], 2, "")),
            Err(WorkflowError::CollectionNotLoaded { .. })
        ));
    }

    #[test]
    fn test_search_orders_by_distance() {
        let store = loaded_store(&[[0.9, 0.9], [0.1, 0.2], [0.0, 0.0], [0.5, 0.5]]);
        let hits = store.search(&query([0.1, 0.2], 2, "")).unwrap().remove(0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert_relative_eq!(hits[0].distance, 0.0, epsilon = 1e-6);
        assert_eq!(hits[1].id, 2);
        assert_eq!(hits[1].fields["word_count"], FieldValue::Int64(10_002));
    }

    #[test]
    fn test_filtered_search() {
        let store = loaded_store(&[[0.1, 0.2], [0.1, 0.2], [0.5, 0.5]]);
        let hits = store
            .search(&query([0.1, 0.2], 3, "word_count >= 10001"))
            .unwrap()
            .remove(0);
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_search_rejects_bad_requests() {
        let store = loaded_store(&[[0.1, 0.2]]);
        let mut wrong_dim = query([0.1, 0.2], 2, "");
        wrong_dim.data = vec![vec![0.1, 0.2, 0.3]];
        assert!(matches!(
            store.search(&wrong_dim),
            Err(WorkflowError::DimensionMismatch { .. })
        ));

        let mut wrong_metric = query([0.1, 0.2], 2, "");
        wrong_metric.search_params.metric_type = MetricType::IP;
        assert!(store.search(&wrong_metric).is_err());

        assert!(matches!(
            store.search(&query([0.1, 0.2], 2, "pages > 3")),
            Err(WorkflowError::UnknownField { .. })
        ));

        let mut wrong_partition = query([0.1, 0.2], 2, "");
        wrong_partition.partition_names = vec!["novels".to_string()];
        assert!(matches!(
            store.search(&wrong_partition),
            Err(WorkflowError::PartitionNotFound { .. })
        ));
    }

    #[test]
    fn test_partitions_scope_inserts_and_searches() {
        let mut store = loaded_store(&[[0.0, 0.0]]);
        store.create_partition("books", "novels").unwrap();
        assert!(store.create_partition("books", "novels").is_err());
        assert!(store.has_partition("books", "novels").unwrap());

        let mut row = rows(&[[0.1, 0.2]]).remove(0);
        row.insert("book_id".to_string(), FieldValue::Int64(42));
        store.insert("books", "novels", vec![row]).unwrap();

        let mut scoped = query([0.1, 0.2], 10, "");
        scoped.partition_names = vec!["novels".to_string()];
        let hits = store.search(&scoped).unwrap().remove(0);
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![42]);

        assert!(matches!(
            store.insert("books", "poetry", rows(&[[0.0, 0.0]])),
            Err(WorkflowError::PartitionNotFound { .. })
        ));
    }

    #[test]
    fn test_insert_replaces_same_primary_key() {
        let mut store = loaded_store(&[[0.0, 0.0], [1.0, 1.0]]);
        store.insert("books", "", rows(&[[0.5, 0.5]])).unwrap();
        assert_eq!(store.stats("books").unwrap().row_count, 2);
    }

    #[test]
    fn test_repeated_partition_searched_once() {
        let store = loaded_store(&[[0.1, 0.2], [0.2, 0.2]]);
        let mut body = query([0.1, 0.2], 2, "");
        body.partition_names = vec![DEFAULT_PARTITION.to_string(), DEFAULT_PARTITION.to_string()];
        let hits = store.search(&body).unwrap().remove(0);
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_auto_id_assigns_keys() {
        let schema = CollectionSchema::new("auto", "")
            .with_field(FieldSchema::int64("id").primary().with_auto_id(true))
            .with_field(FieldSchema::float_vector("v", 2));
        let mut store = CollectionStore::new();
        store.create("auto", schema, 1).unwrap();
        let rows = to_rows(&[Column::float_vector("v", 2, vec![vec![0.0, 0.0]; 3])]);
        let resp = store.insert("auto", "", rows).unwrap();
        assert_eq!(resp.insert_ids, vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn prop_results_sorted_bounded_and_filtered(
            vectors in prop::collection::vec(prop::array::uniform2(0.0f32..1.0), 1..60),
            q in prop::array::uniform2(0.0f32..1.0),
            k in 1usize..20,
            cutoff in 10_000i64..10_060,
        ) {
            let store = loaded_store(&vectors);

            let plain = store.search(&query(q, k, "")).unwrap().remove(0);
            prop_assert!(plain.len() <= k);
            prop_assert_eq!(plain.len(), k.min(vectors.len()));
            prop_assert!(plain.windows(2).all(|w| w[0].distance <= w[1].distance));

            let filter = format!("word_count <= {}", cutoff);
            let filtered = store.search(&query(q, k, &filter)).unwrap().remove(0);
            prop_assert!(filtered.len() <= k);
            prop_assert!(filtered.windows(2).all(|w| w[0].distance <= w[1].distance));
            for hit in &filtered {
                prop_assert!(hit.id + 10_000 <= cutoff);
            }

            // Filtered hits are exactly the matching rows among the whole ranking.
            let everything = store.search(&query(q, vectors.len(), "")).unwrap().remove(0);
            let expected: Vec<i64> = everything
                .iter()
                .filter(|h| h.id + 10_000 <= cutoff)
                .take(k)
                .map(|h| h.id)
                .collect();
            prop_assert_eq!(filtered.iter().map(|h| h.id).collect::<Vec<_>>(), expected);
        }
    }
}
