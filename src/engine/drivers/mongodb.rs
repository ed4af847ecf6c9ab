//! MongoDB Driver
//!
//! Implements the DataEngine trait on top of the official MongoDB driver.
//! MongoDB is schemaless, so `describe_table` infers a field set by sampling
//! documents, and query results project every row onto the union of field
//! names seen in the batch (`_id` first).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, IndexModel};
use tokio::sync::RwLock;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::tls;
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ConnectionConfig, DataOptions, DatabaseUser, Filter,
    FilterOp, IndexInfo, IndexSpec, Namespace, QueryId, QueryResult, Row as QRow, RowData,
    SchemaOperationResult, SessionId, SortDirection, TableColumn, TableSchema, TableSpec, Value,
};

/// Documents sampled when inferring a collection's field set.
const SAMPLE_LIMIT: i64 = 100;

/// MongoDB driver implementation
pub struct MongoDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Client>>>,
}

impl MongoDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_client(&self, session: SessionId) -> EngineResult<Client> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    fn build_connection_string(config: &ConnectionConfig) -> EngineResult<String> {
        let db = config.database.as_deref().unwrap_or("admin");

        let mut options = vec![("authSource".to_string(), "admin".to_string())];
        options.extend(tls::mongo_uri_options(config.tls.as_ref())?);
        let query: Vec<String> = options.into_iter().map(|(k, v)| format!("{k}={v}")).collect();

        let credentials = if config.username.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", config.username, config.password)
        };

        Ok(format!(
            "mongodb://{credentials}{}:{}/{db}?{}",
            config.host,
            config.port,
            query.join("&")
        ))
    }

    fn map_mongo_err(e: mongodb::error::Error) -> EngineError {
        use mongodb::error::ErrorKind as MK;
        match e.kind.as_ref() {
            MK::Authentication { message, .. } => EngineError::auth_failed(message.clone()),
            MK::Io(_) | MK::ServerSelection { .. } => {
                EngineError::connection_failed(e.to_string())
            }
            MK::Command(cmd) => EngineError::rejected(cmd.message.clone()),
            _ => EngineError::rejected(e.to_string()),
        }
    }

    fn bson_to_value(bson: &Bson) -> Value {
        match bson {
            Bson::Null => Value::Null,
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int32(i) => Value::Int(*i as i64),
            Bson::Int64(i) => Value::Int(*i),
            Bson::Double(f) => Value::Float(*f),
            Bson::String(s) => Value::Text(s.clone()),
            Bson::Binary(b) => Value::Bytes(b.bytes.clone()),
            Bson::ObjectId(oid) => Value::Text(oid.to_hex()),
            Bson::DateTime(dt) => Value::Text(dt.to_string()),
            Bson::Array(arr) => Value::Array(arr.iter().map(Self::bson_to_value).collect()),
            Bson::Document(document) => Value::Json(
                serde_json::to_value(document).unwrap_or(serde_json::Value::Null),
            ),
            other => Value::Text(other.to_string()),
        }
    }

    fn value_to_bson(value: &Value) -> Bson {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::Text(s) => {
                // 24-hex strings round-trip back into ObjectIds so _id
                // filters built from displayed rows still match.
                if s.len() == 24 {
                    if let Ok(oid) = ObjectId::parse_str(s) {
                        return Bson::ObjectId(oid);
                    }
                }
                Bson::String(s.clone())
            }
            Value::Bytes(b) => Bson::Binary(mongodb::bson::Binary {
                subtype: mongodb::bson::spec::BinarySubtype::Generic,
                bytes: b.clone(),
            }),
            Value::Json(j) => mongodb::bson::to_bson(j).unwrap_or(Bson::Null),
            Value::Array(items) => Bson::Array(items.iter().map(Self::value_to_bson).collect()),
        }
    }

    /// SQL LIKE patterns become anchored regexes: `%` → `.*`, `_` → `.`.
    fn like_to_regex(pattern: &str) -> String {
        let mut regex = String::with_capacity(pattern.len() + 2);
        regex.push('^');
        for ch in pattern.chars() {
            match ch {
                '%' => regex.push_str(".*"),
                '_' => regex.push('.'),
                c if ".^$*+?()[]{}|\\".contains(c) => {
                    regex.push('\\');
                    regex.push(c);
                }
                c => regex.push(c),
            }
        }
        regex.push('$');
        regex
    }

    fn filters_to_document(filters: &[Filter]) -> EngineResult<Document> {
        let mut out = Document::new();
        for filter in filters {
            let scalar = || {
                filter.values.first().map(Self::value_to_bson).ok_or_else(|| {
                    EngineError::configuration(format!(
                        "filter on '{}' is missing an operand",
                        filter.column
                    ))
                })
            };
            let list = || -> EngineResult<Vec<Bson>> {
                if filter.values.is_empty() {
                    return Err(EngineError::configuration(format!(
                        "IN filter on '{}' has an empty value list",
                        filter.column
                    )));
                }
                Ok(filter.values.iter().map(Self::value_to_bson).collect())
            };

            let condition = match filter.op {
                FilterOp::Eq => doc! { "$eq": scalar()? },
                FilterOp::Ne => doc! { "$ne": scalar()? },
                FilterOp::Gt => doc! { "$gt": scalar()? },
                FilterOp::Gte => doc! { "$gte": scalar()? },
                FilterOp::Lt => doc! { "$lt": scalar()? },
                FilterOp::Lte => doc! { "$lte": scalar()? },
                FilterOp::Like => {
                    let Bson::String(pattern) = scalar()? else {
                        return Err(EngineError::configuration(
                            "LIKE filter requires a text operand",
                        ));
                    };
                    doc! { "$regex": Self::like_to_regex(&pattern) }
                }
                FilterOp::NotLike => {
                    let Bson::String(pattern) = scalar()? else {
                        return Err(EngineError::configuration(
                            "NOT LIKE filter requires a text operand",
                        ));
                    };
                    doc! { "$not": { "$regex": Self::like_to_regex(&pattern) } }
                }
                FilterOp::In => doc! { "$in": list()? },
                FilterOp::NotIn => doc! { "$nin": list()? },
                FilterOp::IsNull => doc! { "$eq": Bson::Null },
                FilterOp::IsNotNull => doc! { "$ne": Bson::Null },
            };
            out.insert(filter.column.clone(), condition);
        }
        Ok(out)
    }

    /// Projects documents onto the union of their field names, `_id` first.
    fn documents_to_result(documents: &[Document], started: Instant) -> QueryResult {
        let execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;

        let mut field_set = BTreeSet::new();
        for document in documents {
            for key in document.keys() {
                field_set.insert(key.clone());
            }
        }
        let mut fields: Vec<String> = field_set.into_iter().collect();
        if let Some(pos) = fields.iter().position(|f| f == "_id") {
            fields.remove(pos);
            fields.insert(0, "_id".to_string());
        }

        let columns: Vec<ColumnInfo> = fields
            .iter()
            .map(|name| ColumnInfo {
                name: name.clone(),
                data_type: "mixed".to_string(),
                nullable: true,
            })
            .collect();

        let rows: Vec<QRow> = documents
            .iter()
            .map(|document| QRow {
                values: fields
                    .iter()
                    .map(|f| document.get(f).map(Self::bson_to_value).unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        QueryResult {
            columns,
            rows,
            affected_rows: None,
            execution_time_ms,
        }
    }

    /// Accepts either a structured JSON request or `db.collection.method(...)`
    /// shell shorthand.
    fn parse_query(query: &str) -> EngineResult<MongoRequest> {
        let trimmed = query.trim();

        if trimmed.starts_with('{') {
            let parsed: serde_json::Value = serde_json::from_str(trimmed)
                .map_err(|e| EngineError::rejected(format!("invalid JSON request: {e}")))?;

            let database = parsed["database"]
                .as_str()
                .ok_or_else(|| EngineError::rejected("missing 'database' field"))?
                .to_string();
            let collection = parsed["collection"]
                .as_str()
                .ok_or_else(|| EngineError::rejected("missing 'collection' field"))?
                .to_string();
            let operation = parsed
                .get("operation")
                .and_then(|v| v.as_str())
                .unwrap_or("find")
                .to_string();
            let filter = match parsed.get("query") {
                Some(q) => mongodb::bson::to_document(q)
                    .map_err(|e| EngineError::rejected(format!("invalid query filter: {e}")))?,
                None => doc! {},
            };

            return Ok(MongoRequest {
                database,
                collection,
                operation,
                filter,
            });
        }

        // db.collection.find({...}) / db.collection.countDocuments()
        if let Some((head, tail)) = trimmed.split_once('(') {
            let segments: Vec<&str> = head.split('.').collect();
            if segments.len() == 3 {
                let body = tail.trim_end_matches(')').trim();
                let filter = if body.is_empty() {
                    doc! {}
                } else {
                    let json: serde_json::Value = serde_json::from_str(body).map_err(|e| {
                        EngineError::rejected(format!("invalid filter document: {e}"))
                    })?;
                    mongodb::bson::to_document(&json)
                        .map_err(|e| EngineError::rejected(format!("invalid filter document: {e}")))?
                };
                return Ok(MongoRequest {
                    database: segments[0].to_string(),
                    collection: segments[1].to_string(),
                    operation: segments[2].to_string(),
                    filter,
                });
            }
        }

        Err(EngineError::rejected(
            "expected {\"database\": ..., \"collection\": ..., \"query\": ...} \
             or db.collection.find({...})",
        ))
    }
}

#[derive(Debug)]
struct MongoRequest {
    database: String,
    collection: String,
    operation: String,
    filter: Document,
}

impl Default for MongoDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataEngine for MongoDriver {
    fn driver_id(&self) -> &'static str {
        "mongodb"
    }

    fn driver_name(&self) -> &'static str {
        "MongoDB"
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let conn_str = Self::build_connection_string(config)?;

        let options = ClientOptions::parse(&conn_str)
            .await
            .map_err(Self::map_mongo_err)?;
        let client = Client::with_options(options)
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(Self::map_mongo_err)?;
        Ok(())
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId> {
        let conn_str = Self::build_connection_string(config)?;

        let options = ClientOptions::parse(&conn_str)
            .await
            .map_err(Self::map_mongo_err)?;
        let client = Client::with_options(options)
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(Self::map_mongo_err)?;

        let session_id = SessionId::new();
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, client);

        Ok(session_id)
    }

    async fn disconnect(&self, session: SessionId) -> EngineResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(&session)
            .ok_or_else(|| EngineError::session_not_found(session))?;
        Ok(())
    }

    async fn ping(&self, session: SessionId) -> EngineResult<bool> {
        let client = self.get_client(session).await?;
        Ok(client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        _query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let client = self.get_client(session).await?;
        let start = Instant::now();

        let request = Self::parse_query(query)?;
        let database = client.database(&request.database);

        match request.operation.as_str() {
            "find" => {
                let collection = database.collection::<Document>(&request.collection);
                let mut cursor = collection
                    .find(request.filter)
                    .limit(1000)
                    .await
                    .map_err(Self::map_mongo_err)?;

                let mut documents = Vec::new();
                while let Some(document) =
                    cursor.try_next().await.map_err(Self::map_mongo_err)?
                {
                    documents.push(document);
                }
                Ok(Self::documents_to_result(&documents, start))
            }
            "countDocuments" | "count" => {
                let collection = database.collection::<Document>(&request.collection);
                let count = collection
                    .count_documents(request.filter)
                    .await
                    .map_err(Self::map_mongo_err)?;
                Ok(Self::documents_to_result(
                    &[doc! { "count": count as i64 }],
                    start,
                ))
            }
            "deleteMany" => {
                let collection = database.collection::<Document>(&request.collection);
                let result = collection
                    .delete_many(request.filter)
                    .await
                    .map_err(Self::map_mongo_err)?;
                Ok(QueryResult::with_affected_rows(
                    result.deleted_count,
                    start.elapsed().as_micros() as f64 / 1000.0,
                ))
            }
            "create_collection" => {
                database
                    .run_command(doc! { "create": request.collection })
                    .await
                    .map_err(Self::map_mongo_err)?;
                let mut empty = QueryResult::empty();
                empty.execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
                Ok(empty)
            }
            other => Err(EngineError::not_supported(format!(
                "unsupported MongoDB operation '{other}'"
            ))),
        }
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let client = self.get_client(session).await?;

        let databases = client
            .list_database_names()
            .await
            .map_err(Self::map_mongo_err)?;

        Ok(databases
            .into_iter()
            .filter(|db| db != "admin" && db != "config" && db != "local")
            .map(Namespace::new)
            .collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let client = self.get_client(session).await?;

        let names = client
            .database(&namespace.database)
            .list_collection_names()
            .await
            .map_err(Self::map_mongo_err)?;

        let mut collections: Vec<Collection> = names
            .into_iter()
            .map(|name| Collection {
                namespace: namespace.clone(),
                name,
                collection_type: CollectionType::Collection,
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    async fn describe_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<TableSchema> {
        let client = self.get_client(session).await?;
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let cursor = collection
            .find(doc! {})
            .limit(SAMPLE_LIMIT)
            .await
            .map_err(Self::map_mongo_err)?;
        let documents: Vec<Document> =
            cursor.try_collect().await.map_err(Self::map_mongo_err)?;

        let mut fields: HashMap<String, &'static str> = HashMap::new();
        for document in &documents {
            for (key, value) in document.iter() {
                fields.entry(key.clone()).or_insert(match value {
                    Bson::Null => "null",
                    Bson::Boolean(_) => "boolean",
                    Bson::Int32(_) => "int32",
                    Bson::Int64(_) => "int64",
                    Bson::Double(_) => "double",
                    Bson::String(_) => "string",
                    Bson::ObjectId(_) => "ObjectId",
                    Bson::DateTime(_) => "datetime",
                    Bson::Array(_) => "array",
                    Bson::Document(_) => "document",
                    Bson::Binary(_) => "binary",
                    _ => "mixed",
                });
            }
        }

        let mut columns: Vec<TableColumn> = fields
            .into_iter()
            .map(|(name, data_type)| TableColumn {
                is_primary_key: name == "_id",
                name,
                data_type: data_type.to_string(),
                nullable: true,
                default_value: None,
            })
            .collect();
        columns.sort_by(|a, b| match (a.name.as_str(), b.name.as_str()) {
            ("_id", _) => std::cmp::Ordering::Less,
            (_, "_id") => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });

        let count = collection.estimated_document_count().await.ok();

        Ok(TableSchema {
            columns,
            primary_key: Some(vec!["_id".to_string()]),
            row_count_estimate: count,
        })
    }

    async fn read_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let client = self.get_client(session).await?;
        let start = Instant::now();

        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let filter = Self::filters_to_document(&options.filters)?;

        let mut sort = Document::new();
        for spec in &options.sort {
            sort.insert(
                spec.column.clone(),
                match spec.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                },
            );
        }

        let mut find = collection.find(filter);
        if !sort.is_empty() {
            find = find.sort(sort);
        }
        if let Some(offset) = options.offset {
            find = find.skip(offset);
        }
        if let Some(limit) = options.limit {
            find = find.limit(limit as i64);
        }

        let cursor = find.await.map_err(Self::map_mongo_err)?;
        let documents: Vec<Document> =
            cursor.try_collect().await.map_err(Self::map_mongo_err)?;

        Ok(Self::documents_to_result(&documents, start))
    }

    // ==================== Indexes ====================

    async fn list_indexes(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let client = self.get_client(session).await?;
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let cursor = collection.list_indexes().await.map_err(Self::map_mongo_err)?;
        let models: Vec<IndexModel> =
            cursor.try_collect().await.map_err(Self::map_mongo_err)?;

        Ok(models
            .into_iter()
            .map(|model| {
                let options = model.options.unwrap_or_default();
                IndexInfo {
                    name: options.name.unwrap_or_default(),
                    columns: model.keys.keys().cloned().collect(),
                    unique: options.unique.unwrap_or(false),
                    index_type: None,
                }
            })
            .collect())
    }

    async fn create_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let client = self.get_client(session).await?;
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let mut keys = Document::new();
        for column in &index.columns {
            keys.insert(column.clone(), 1);
        }
        let model = IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(index.name.clone())
                    .unique(index.unique)
                    .build(),
            )
            .build();

        let description = format!(
            "createIndex {} on {} ({})",
            index.name,
            table,
            index.columns.join(", ")
        );
        match collection.create_index(model).await {
            Ok(_) => Ok(SchemaOperationResult::ok(description)),
            Err(e) => match Self::map_mongo_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, description))
                }
                other => Err(other),
            },
        }
    }

    async fn drop_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let client = self.get_client(session).await?;

        let description = format!("dropIndex {index} on {table}");
        let command = doc! { "dropIndexes": table, "index": index };
        match client.database(&namespace.database).run_command(command).await {
            Ok(_) => Ok(SchemaOperationResult::ok(description)),
            Err(e) => match Self::map_mongo_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, description))
                }
                other => Err(other),
            },
        }
    }

    // ==================== Collection lifecycle ====================
    // Column specs have no meaning here; create_table maps to collection
    // creation by name only.

    async fn create_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let client = self.get_client(session).await?;

        let description = format!("createCollection {}", spec.name);
        let command = doc! { "create": spec.name.clone() };
        match client.database(&namespace.database).run_command(command).await {
            Ok(_) => Ok(SchemaOperationResult::ok(description)),
            Err(e) => match Self::map_mongo_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, description))
                }
                other => Err(other),
            },
        }
    }

    async fn drop_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let client = self.get_client(session).await?;
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let description = format!("dropCollection {table}");
        match collection.drop().await {
            Ok(()) => Ok(SchemaOperationResult::ok(description)),
            Err(e) => match Self::map_mongo_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, description))
                }
                other => Err(other),
            },
        }
    }

    async fn rename_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let client = self.get_client(session).await?;

        // renameCollection is an admin-database command.
        let description = format!("renameCollection {old_name} -> {new_name}");
        let command = doc! {
            "renameCollection": format!("{}.{}", namespace.database, old_name),
            "to": format!("{}.{}", namespace.database, new_name),
        };
        match client.database("admin").run_command(command).await {
            Ok(_) => Ok(SchemaOperationResult::ok(description)),
            Err(e) => match Self::map_mongo_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, description))
                }
                other => Err(other),
            },
        }
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let client = self.get_client(session).await?;

        let reply = client
            .database("admin")
            .run_command(doc! { "usersInfo": 1 })
            .await
            .map_err(Self::map_mongo_err)?;

        let mut users = Vec::new();
        if let Ok(entries) = reply.get_array("users") {
            for entry in entries {
                let Some(document) = entry.as_document() else {
                    continue;
                };
                let Ok(name) = document.get_str("user") else {
                    continue;
                };
                let privileges = document
                    .get_array("roles")
                    .map(|roles| {
                        roles
                            .iter()
                            .filter_map(|role| {
                                let role = role.as_document()?;
                                Some(format!(
                                    "{}@{}",
                                    role.get_str("role").ok()?,
                                    role.get_str("db").ok()?
                                ))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                users.push(DatabaseUser {
                    name: name.to_string(),
                    privileges,
                });
            }
        }
        Ok(users)
    }

    // ==================== Row mutation ====================

    async fn insert_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        let client = self.get_client(session).await?;
        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let mut document = Document::new();
        for (key, value) in &data.columns {
            document.insert(key.clone(), Self::value_to_bson(value));
        }

        let start = Instant::now();
        collection
            .insert_one(document)
            .await
            .map_err(Self::map_mongo_err)?;

        Ok(QueryResult::with_affected_rows(
            1,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }

    async fn delete_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        primary_key: &RowData,
    ) -> EngineResult<QueryResult> {
        let client = self.get_client(session).await?;

        if primary_key.columns.is_empty() {
            return Err(EngineError::rejected(
                "Primary key required for delete operations",
            ));
        }

        let collection = client
            .database(&namespace.database)
            .collection::<Document>(table);

        let mut filter = Document::new();
        for (key, value) in &primary_key.columns {
            filter.insert(key.clone(), Self::value_to_bson(value));
        }

        let start = Instant::now();
        let result = collection
            .delete_one(filter)
            .await
            .map_err(Self::map_mongo_err)?;

        Ok(QueryResult::with_affected_rows(
            result.deleted_count,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_request_parses_database_collection_and_filter() {
        let request = MongoDriver::parse_query(
            r#"{"database": "shop", "collection": "orders", "query": {"status": "open"}}"#,
        )
        .expect("parse");
        assert_eq!(request.database, "shop");
        assert_eq!(request.collection, "orders");
        assert_eq!(request.operation, "find");
        assert_eq!(request.filter.get_str("status").ok(), Some("open"));
    }

    #[test]
    fn shell_shorthand_parses_method_and_filter() {
        let request =
            MongoDriver::parse_query(r#"shop.orders.find({"qty": 2})"#).expect("parse");
        assert_eq!(request.database, "shop");
        assert_eq!(request.collection, "orders");
        assert_eq!(request.operation, "find");
        assert_eq!(request.filter.get_i64("qty").ok(), Some(2));
    }

    #[test]
    fn garbage_query_is_rejected_with_expected_shapes() {
        let err = MongoDriver::parse_query("SELECT * FROM t").expect_err("must fail");
        assert!(err.to_string().contains("db.collection.find"));
    }

    #[test]
    fn like_patterns_become_anchored_regexes() {
        assert_eq!(MongoDriver::like_to_regex("ali%"), "^ali.*$");
        assert_eq!(MongoDriver::like_to_regex("a_c"), "^a.c$");
        assert_eq!(MongoDriver::like_to_regex("50%+tax"), "^50.*\\+tax$");
    }

    #[test]
    fn filters_render_mongo_operators() {
        let filters = vec![
            Filter::new("qty", FilterOp::Gte, Value::Int(5)),
            Filter::in_list(
                "status",
                vec![Value::Text("open".into()), Value::Text("held".into())],
            ),
            Filter::is_null("note"),
        ];
        let document = MongoDriver::filters_to_document(&filters).expect("filters");

        assert_eq!(
            document.get_document("qty").expect("qty").get_i64("$gte").ok(),
            Some(5)
        );
        assert!(document.get_document("status").expect("status").contains_key("$in"));
        assert_eq!(
            document.get_document("note").expect("note").get("$eq"),
            Some(&Bson::Null)
        );
    }

    #[test]
    fn empty_in_list_is_a_configuration_error() {
        let filters = vec![Filter {
            column: "status".into(),
            op: FilterOp::In,
            values: vec![],
        }];
        assert!(MongoDriver::filters_to_document(&filters).is_err());
    }

    #[test]
    fn hex_strings_round_trip_into_object_ids() {
        let bson = MongoDriver::value_to_bson(&Value::Text(
            "507f1f77bcf86cd799439011".into(),
        ));
        assert!(matches!(bson, Bson::ObjectId(_)));

        let bson = MongoDriver::value_to_bson(&Value::Text("plain text".into()));
        assert!(matches!(bson, Bson::String(_)));
    }

    #[test]
    fn object_ids_surface_as_hex_text() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").expect("oid");
        assert_eq!(
            MongoDriver::bson_to_value(&Bson::ObjectId(oid)),
            Value::Text("507f1f77bcf86cd799439011".into())
        );
    }
}
