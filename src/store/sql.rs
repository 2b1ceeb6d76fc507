//! SQL generation for the PostgreSQL store.
//!
//! Collections map to tables in the connection's current schema:
//!
//! - document tables: `(_seq BIGSERIAL, _id TEXT PRIMARY KEY, doc JSONB)`
//! - join tables: `(_seq BIGSERIAL, "_id" TEXT PRIMARY KEY, "ParentID" TEXT,
//!   "ChildID" TEXT, "ModifiedOn" TIMESTAMPTZ)` with a unique `(ParentID, ChildID)`
//!   index and a secondary `ChildID` index
//!
//! `_seq` carries insertion order. Schema statements go through sea-query;
//! data statements are parameterised SQL built here.

use crate::store::filter::{Filter, FindOptions, Order, ID_FIELD};
use crate::store::{JoinFilter, JoinRecord};
use chrono::{DateTime, Utc};
use may_postgres::types::ToSql;
use sea_query::{Alias, ColumnDef, Index, PostgresQueryBuilder, Table};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// PostgreSQL's identifier limit (NAMEDATALEN - 1)
pub(crate) const MAX_IDENTIFIER_LEN: usize = 63;

pub(crate) type SqlParam = Box<dyn ToSql + Sync + Send>;

/// A statement with its owned parameters
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Register a parameter and return its placeholder
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &dyn ToSql)
            .collect()
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Short stable suffix for index names derived from long collection names
fn name_hash(collection: &str) -> String {
    let digest = Sha256::digest(collection.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub(crate) fn create_document_table(collection: &str) -> String {
    Table::create()
        .table(Alias::new(collection.to_owned()))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("_seq"))
                .big_integer()
                .not_null()
                .auto_increment(),
        )
        .col(ColumnDef::new(Alias::new("_id")).text().not_null().primary_key())
        .col(ColumnDef::new(Alias::new("doc")).json_binary().not_null())
        .to_owned()
        .build(PostgresQueryBuilder)
}

pub(crate) fn create_join_table(collection: &str) -> String {
    Table::create()
        .table(Alias::new(collection.to_owned()))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("_seq"))
                .big_integer()
                .not_null()
                .auto_increment(),
        )
        .col(ColumnDef::new(Alias::new("_id")).text().not_null().primary_key())
        .col(ColumnDef::new(Alias::new("ParentID")).text().not_null())
        .col(ColumnDef::new(Alias::new("ChildID")).text().not_null())
        .col(
            ColumnDef::new(Alias::new("ModifiedOn"))
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned()
        .build(PostgresQueryBuilder)
}

/// Unique `(ParentID, ChildID)` index backing pair-keyed upserts
pub(crate) fn create_pair_index(collection: &str) -> String {
    Index::create()
        .if_not_exists()
        .name(format!("ll_pair_{}", name_hash(collection)))
        .table(Alias::new(collection.to_owned()))
        .col(Alias::new("ParentID"))
        .col(Alias::new("ChildID"))
        .unique()
        .to_owned()
        .build(PostgresQueryBuilder)
}

pub(crate) fn create_child_index(collection: &str) -> String {
    Index::create()
        .if_not_exists()
        .name(format!("ll_child_{}", name_hash(collection)))
        .table(Alias::new(collection.to_owned()))
        .col(Alias::new("ChildID"))
        .to_owned()
        .build(PostgresQueryBuilder)
}

pub(crate) const TABLE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_name = $1)";

pub(crate) const LIST_TABLES: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() ORDER BY table_name";

fn path_param(field: &str) -> SqlParam {
    Box::new(field.split('.').map(str::to_owned).collect::<Vec<String>>())
}

fn string_values(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect()
}

/// Compile a `Filter` into a boolean SQL expression over a document table
fn compile_filter(filter: &Filter, stmt: &mut Statement) -> String {
    match filter {
        Filter::All => "TRUE".to_string(),
        Filter::Eq(field, value) if field == ID_FIELD => match value.as_str() {
            Some(id) => format!("_id = {}", stmt.bind(Box::new(id.to_owned()))),
            None => "FALSE".to_string(),
        },
        Filter::Eq(field, value) => {
            let path = stmt.bind(path_param(field));
            let value = stmt.bind(Box::new(value.clone()));
            format!("(doc #> {path}::text[]) = {value}::jsonb")
        }
        Filter::Ne(field, value) if field == ID_FIELD => match value.as_str() {
            Some(id) => format!("_id <> {}", stmt.bind(Box::new(id.to_owned()))),
            None => "TRUE".to_string(),
        },
        Filter::Ne(field, value) => {
            let path = stmt.bind(path_param(field));
            let value = stmt.bind(Box::new(value.clone()));
            format!("(doc #> {path}::text[]) IS DISTINCT FROM {value}::jsonb")
        }
        Filter::In(field, values) if field == ID_FIELD => {
            let ids = stmt.bind(Box::new(string_values(values)));
            format!("_id = ANY({ids}::text[])")
        }
        Filter::In(field, values) => {
            let path = stmt.bind(path_param(field));
            let values = stmt.bind(Box::new(values.clone()));
            format!("(doc #> {path}::text[]) = ANY({values}::jsonb[])")
        }
        Filter::Gt(field, value) => compile_comparison(field, ">", value, stmt),
        Filter::Gte(field, value) => compile_comparison(field, ">=", value, stmt),
        Filter::Lt(field, value) => compile_comparison(field, "<", value, stmt),
        Filter::Lte(field, value) => compile_comparison(field, "<=", value, stmt),
        Filter::Exists(field, expected) if field == ID_FIELD => {
            if *expected { "TRUE" } else { "FALSE" }.to_string()
        }
        Filter::Exists(field, expected) => {
            let path = stmt.bind(path_param(field));
            let test = if *expected { "IS NOT NULL" } else { "IS NULL" };
            format!("(doc #> {path}::text[]) {test}")
        }
        Filter::And(filters) if filters.is_empty() => "TRUE".to_string(),
        Filter::And(filters) => {
            let parts: Vec<String> = filters.iter().map(|f| compile_filter(f, stmt)).collect();
            format!("({})", parts.join(" AND "))
        }
        Filter::Or(filters) if filters.is_empty() => "FALSE".to_string(),
        Filter::Or(filters) => {
            let parts: Vec<String> = filters.iter().map(|f| compile_filter(f, stmt)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}

/// Ordering comparisons only hold between values of the same JSON type
fn compile_comparison(field: &str, op: &str, value: &Value, stmt: &mut Statement) -> String {
    if field == ID_FIELD {
        return match value.as_str() {
            Some(id) => format!("_id {op} {}", stmt.bind(Box::new(id.to_owned()))),
            None => "FALSE".to_string(),
        };
    }
    let path = stmt.bind(path_param(field));
    let value = stmt.bind(Box::new(value.clone()));
    format!(
        "(jsonb_typeof(doc #> {path}::text[]) = jsonb_typeof({value}::jsonb) \
         AND (doc #> {path}::text[]) {op} {value}::jsonb)"
    )
}

fn where_clause(filter: &Filter, stmt: &mut Statement) -> String {
    match filter {
        Filter::All => String::new(),
        other => format!(" WHERE {}", compile_filter(other, stmt)),
    }
}

pub(crate) fn select_documents(collection: &str, filter: &Filter, options: &FindOptions) -> Statement {
    let mut stmt = Statement::new();
    let document = match &options.projection {
        Some(fields) => {
            let keys = stmt.bind(Box::new(fields.clone()));
            format!(
                "(SELECT COALESCE(jsonb_object_agg(key, value), '{{}}'::jsonb) \
                 FROM jsonb_each(doc) WHERE key = ANY({keys}::text[]))"
            )
        }
        None => "doc".to_string(),
    };
    let where_sql = where_clause(filter, &mut stmt);
    let order_sql = match &options.sort {
        Some((field, order)) if field == ID_FIELD => match order {
            Order::Asc => " ORDER BY _id ASC".to_string(),
            Order::Desc => " ORDER BY _id DESC".to_string(),
        },
        Some((field, order)) => {
            let path = stmt.bind(path_param(field));
            match order {
                Order::Asc => format!(" ORDER BY doc #> {path}::text[] ASC NULLS FIRST, _seq"),
                Order::Desc => format!(" ORDER BY doc #> {path}::text[] DESC NULLS LAST, _seq"),
            }
        }
        None => " ORDER BY _seq".to_string(),
    };
    let mut page_sql = String::new();
    if let Some(limit) = options.limit {
        let p = stmt.bind(Box::new(limit as i64));
        page_sql.push_str(&format!(" LIMIT {p}"));
    }
    if let Some(skip) = options.skip {
        let p = stmt.bind(Box::new(skip as i64));
        page_sql.push_str(&format!(" OFFSET {p}"));
    }
    stmt.sql = format!(
        "SELECT _id, {document} FROM {}{where_sql}{order_sql}{page_sql}",
        quote_ident(collection)
    );
    stmt
}

pub(crate) fn count_documents(collection: &str, filter: &Filter) -> Statement {
    let mut stmt = Statement::new();
    let where_sql = where_clause(filter, &mut stmt);
    stmt.sql = format!("SELECT COUNT(*) FROM {}{where_sql}", quote_ident(collection));
    stmt
}

pub(crate) fn delete_documents(collection: &str, filter: &Filter) -> Statement {
    let mut stmt = Statement::new();
    let where_sql = where_clause(filter, &mut stmt);
    stmt.sql = format!("DELETE FROM {}{where_sql}", quote_ident(collection));
    stmt
}

pub(crate) fn upsert_document(collection: &str, id: &str, document: Value) -> Statement {
    let mut stmt = Statement::new();
    let id = stmt.bind(Box::new(id.to_owned()));
    let doc = stmt.bind(Box::new(document));
    stmt.sql = format!(
        "INSERT INTO {} (_id, doc) VALUES ({id}, {doc}::jsonb) \
         ON CONFLICT (_id) DO UPDATE SET doc = EXCLUDED.doc",
        quote_ident(collection)
    );
    stmt
}

/// Pair-keyed bulk upsert; repeated pairs in one call collapse to the last occurrence
pub(crate) fn upsert_join_records(collection: &str, records: &[JoinRecord]) -> Statement {
    let mut seen = HashSet::new();
    let mut unique: Vec<&JoinRecord> = records
        .iter()
        .rev()
        .filter(|r| seen.insert((r.parent_id.as_str(), r.child_id.as_str())))
        .collect();
    unique.reverse();

    let ids: Vec<String> = unique.iter().map(|r| r.id.clone()).collect();
    let parents: Vec<String> = unique.iter().map(|r| r.parent_id.clone()).collect();
    let children: Vec<String> = unique.iter().map(|r| r.child_id.clone()).collect();
    let stamps: Vec<DateTime<Utc>> = unique.iter().map(|r| r.modified_on).collect();

    let mut stmt = Statement::new();
    let ids = stmt.bind(Box::new(ids));
    let parents = stmt.bind(Box::new(parents));
    let children = stmt.bind(Box::new(children));
    let stamps = stmt.bind(Box::new(stamps));
    stmt.sql = format!(
        "INSERT INTO {} (\"_id\", \"ParentID\", \"ChildID\", \"ModifiedOn\") \
         SELECT * FROM UNNEST({ids}::text[], {parents}::text[], {children}::text[], {stamps}::timestamptz[]) \
         ON CONFLICT (\"ParentID\", \"ChildID\") DO UPDATE SET \"ModifiedOn\" = EXCLUDED.\"ModifiedOn\"",
        quote_ident(collection)
    );
    stmt
}

fn compile_join_filter(filter: &JoinFilter, stmt: &mut Statement) -> String {
    match filter {
        JoinFilter::All => "TRUE".to_string(),
        JoinFilter::Eq(field, id) => {
            let p = stmt.bind(Box::new(id.clone()));
            format!("{} = {p}", quote_ident(field.column()))
        }
        JoinFilter::In(field, ids) => {
            let p = stmt.bind(Box::new(ids.clone()));
            format!("{} = ANY({p}::text[])", quote_ident(field.column()))
        }
        JoinFilter::Pairs(pairs) => {
            let parents: Vec<String> = pairs.iter().map(|(p, _)| p.clone()).collect();
            let children: Vec<String> = pairs.iter().map(|(_, c)| c.clone()).collect();
            let p = stmt.bind(Box::new(parents));
            let c = stmt.bind(Box::new(children));
            format!("(\"ParentID\", \"ChildID\") IN (SELECT * FROM UNNEST({p}::text[], {c}::text[]))")
        }
        JoinFilter::EitherIn(ids) => {
            let p = stmt.bind(Box::new(ids.clone()));
            format!("(\"ParentID\" = ANY({p}::text[]) OR \"ChildID\" = ANY({p}::text[]))")
        }
    }
}

pub(crate) fn select_join_records(collection: &str, filter: &JoinFilter) -> Statement {
    let mut stmt = Statement::new();
    let cond = compile_join_filter(filter, &mut stmt);
    stmt.sql = format!(
        "SELECT \"_id\", \"ParentID\", \"ChildID\", \"ModifiedOn\" FROM {} WHERE {cond} ORDER BY _seq",
        quote_ident(collection)
    );
    stmt
}

pub(crate) fn count_join_records(collection: &str, filter: &JoinFilter) -> Statement {
    let mut stmt = Statement::new();
    let cond = compile_join_filter(filter, &mut stmt);
    stmt.sql = format!("SELECT COUNT(*) FROM {} WHERE {cond}", quote_ident(collection));
    stmt
}

pub(crate) fn delete_join_records(collection: &str, filter: &JoinFilter) -> Statement {
    let mut stmt = Statement::new();
    let cond = compile_join_filter(filter, &mut stmt);
    stmt.sql = format!("DELETE FROM {} WHERE {cond}", quote_ident(collection));
    stmt
}
