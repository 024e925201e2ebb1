use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use surrealdb::engine::any::Any as SurDb;
use surrealdb::method::Query;
use surrealdb::sql::{to_value, Thing, Value};
use tracing::warn;

use crate::database::client::Db;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, AppResult, CtxResult};

pub enum IdentIdName {
    Id(Thing),
    ColumnIdent {
        column: String,
        val: String,
        rec: bool,
    },
    ColumnIdentAnd(Vec<IdentIdName>),
}

impl IdentIdName {
    pub fn get_bindings_map(&self) -> HashMap<String, String> {
        let mut bindings: HashMap<String, String> = HashMap::new();
        match self {
            IdentIdName::Id(id) => {
                bindings.insert("id".to_string(), id.to_raw());
                bindings
            }
            IdentIdName::ColumnIdent { val, column, .. } => {
                bindings.insert(column.to_string(), val.clone());
                bindings
            }
            IdentIdName::ColumnIdentAnd(and_filters) => {
                and_filters.iter().fold(bindings, |mut acc, iin| {
                    acc.extend(iin.get_bindings_map());
                    acc
                })
            }
        }
    }
}

impl Display for IdentIdName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentIdName::Id(_) => f.write_str("<record>$id"),
            IdentIdName::ColumnIdent { column, rec, .. } => {
                let prefix = if *rec { "<record>" } else { "" };
                f.write_str(format!("{column}={prefix}${column}").as_str())
            }
            IdentIdName::ColumnIdentAnd(add_filters) => f.write_str(
                add_filters
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(" AND ")
                    .as_str(),
            ),
        }
    }
}

type SerializableQryValsHash<T> = HashMap<String, T>;

#[derive(Debug)]
pub struct QryBindingsVal<T: Serialize + 'static + Clone>(String, SerializableQryValsHash<T>);

impl<T: Serialize + 'static + Clone> QryBindingsVal<T> {
    pub fn new(qry: String, bindings: HashMap<String, T>) -> Self {
        QryBindingsVal(qry, bindings)
    }
    pub fn get_query_string(&self) -> String {
        self.0.clone()
    }
    pub fn get_bindings(&self) -> HashMap<String, T> {
        self.1.clone()
    }
    pub fn into_parts(self) -> (String, HashMap<String, T>) {
        (self.0, self.1)
    }
    pub fn into_query(self, db: &Db) -> Query<SurDb> {
        self.1
            .into_iter()
            .fold(db.query(self.0), |qry, n_val| qry.bind(n_val))
    }
}

/// Binding for an optional field, `NONE` when absent.
pub fn opt_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::None)
}

pub fn to_binding_value<T: Serialize + 'static>(value: T) -> AppResult<Value> {
    to_value(value).map_err(|e| AppError::SurrealDb {
        source: e.to_string(),
    })
}

pub struct Pagination {
    pub order_by: Option<String>,
    pub order_dir: Option<QryOrder>,
    pub count: u16,
    pub start: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            order_by: Some("created_at".to_string()),
            order_dir: Some(QryOrder::DESC),
            count: 20,
            start: 0,
        }
    }
}

impl Pagination {
    pub fn get_query_str(&self, bindings: &mut HashMap<String, String>) -> String {
        let order = match self.order_by.as_ref() {
            None => String::new(),
            Some(order_by) => {
                let dir = self.order_dir.as_ref().unwrap_or(&QryOrder::DESC);
                format!(" ORDER BY {order_by} {dir}")
            }
        };
        let count = if self.count == 0 { 20 } else { self.count };
        bindings.insert("_limit_val".to_string(), count.to_string());
        bindings.insert("_start_val".to_string(), self.start.to_string());
        format!("{order} LIMIT BY type::int($_limit_val) START AT type::int($_start_val)")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum QryOrder {
    DESC,
    ASC,
}

impl fmt::Display for QryOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QryOrder::DESC => write!(f, "DESC"),
            QryOrder::ASC => write!(f, "ASC"),
        }
    }
}

pub fn get_entity_query_str(
    ident: &IdentIdName,
    select_fields_or_id: Option<&str>,
    pagination: Option<Pagination>,
    table_name: String,
) -> Result<QryBindingsVal<String>, AppError> {
    let mut q_bindings: HashMap<String, String> = HashMap::new();
    let fields = select_fields_or_id.unwrap_or("*");

    let query_string = match ident {
        IdentIdName::Id(id) => {
            if id.to_raw().len() < 3 {
                return Err(AppError::Generic {
                    description: "IdentIdName::Id() value too short".to_string(),
                });
            }
            q_bindings.insert("id".to_string(), id.to_raw());
            format!("SELECT {fields} FROM <record>$id;")
        }
        _ => {
            let pagination_q = match pagination {
                None => String::new(),
                Some(pag) => {
                    if pag.start > 0 && pag.order_by.is_none() {
                        warn!("query for table {table_name} has START AT but no ORDER BY");
                    }
                    pag.get_query_str(&mut q_bindings)
                }
            };
            q_bindings.extend(ident.get_bindings_map());
            q_bindings.insert("_table".to_string(), table_name);
            format!("SELECT {fields} FROM type::table($_table) WHERE {ident}{pagination_q};")
        }
    };
    Ok(QryBindingsVal(query_string, q_bindings))
}

pub async fn get_entity<T: for<'a> Deserialize<'a>>(
    db: &Db,
    table_name: String,
    ident: &IdentIdName,
) -> AppResult<Option<T>> {
    let query_string = get_entity_query_str(ident, Some("*"), None, table_name)?;
    get_query(db, query_string).await
}

pub async fn get_query<T: for<'a> Deserialize<'a>>(
    db: &Db,
    query_string: QryBindingsVal<String>,
) -> AppResult<Option<T>> {
    let mut res = query_string.into_query(db).await?;
    let res = res.take::<Option<T>>(0)?;
    Ok(res)
}

pub async fn get_entity_list<T: for<'a> Deserialize<'a>>(
    db: &Db,
    table_name: String,
    ident: &IdentIdName,
    pagination: Option<Pagination>,
) -> AppResult<Vec<T>> {
    let query_string = get_entity_query_str(ident, Some("*"), pagination, table_name)?;
    get_list_qry(db, query_string).await
}

pub async fn get_list_qry<T: for<'a> Deserialize<'a>>(
    db: &Db,
    query_string: QryBindingsVal<String>,
) -> AppResult<Vec<T>> {
    if query_string.0.is_empty() {
        return Ok(vec![]);
    }
    let mut res = query_string.into_query(db).await?;
    let res = res.take::<Vec<T>>(0)?;
    Ok(res)
}

pub async fn record_exists(db: &Db, record_id: &Thing) -> AppResult<()> {
    let qry = "RETURN record::exists(<record>$rec_id);";
    let mut res = db.query(qry).bind(("rec_id", record_id.to_raw())).await?;
    let res: Option<bool> = res.take(0)?;
    match res.unwrap_or(false) {
        true => Ok(()),
        false => Err(AppError::EntityFailIdNotFound {
            ident: record_id.to_raw(),
        }),
    }
}

pub fn with_not_found_err<T>(opt: Option<T>, ctx: &Ctx, ident: &str) -> CtxResult<T> {
    match opt {
        None => Err(ctx.to_ctx_error(AppError::EntityFailIdNotFound {
            ident: ident.to_string(),
        })),
        Some(res) => Ok(res),
    }
}
