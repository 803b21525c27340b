use thiserror::Error;

use sqlweave_core::DbError;

/// Errors raised by the metamodel, the expression renderer, the XML schema
/// config, and the session. Everything below the ORM layer arrives through
/// the `Db` variant.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Db(#[from] DbError),

    // -- schema --
    #[error("bad table name '{0}'")]
    BadTableName(String),

    #[error("bad column name '{column}' while constructing metadata '{table}'")]
    BadColumnName { table: String, column: String },

    #[error("column '{column}' not found in metadata '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("table '{0}' has no columns in metadata")]
    TableWithoutColumns(String),

    #[error("table '{0}' not found in metadata")]
    TableNotFound(String),

    #[error("class '{0}' not found in metadata")]
    ClassNotFound(String),

    #[error("foreign key from table '{slave}' to table '{master}' not found in metadata")]
    FkNotFound { master: String, slave: String },

    #[error("table '{0}' has no surrogate primary key")]
    NoSurrogatePk(String),

    #[error("column '{column}' in table '{table}' is read-only")]
    ReadOnlyColumn { table: String, column: String },

    #[error("schema integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("bad attribute name '{attr}' of object '{object}'")]
    BadAttributeName { object: String, attr: String },

    #[error("no relation '{relation}' on class '{class}' in metadata")]
    RelationNotFound { class: String, relation: String },

    #[error("more than one relation between tables '{0}' and '{1}'")]
    AmbiguousRelation(String, String),

    // -- expressions / SQL generation --
    #[error("bad SQL operation: {0}")]
    BadSqlOperation(String),

    // -- session --
    #[error("object not found by key: {0}")]
    ObjectNotFoundByKey(String),

    #[error("cascade delete restricted on relation between '{0}' and '{1}'")]
    CascadeDeleteRestricted(String, String),

    #[error("cycle detected in the object graph")]
    CycleDetected,

    #[error("object already belongs to another session")]
    AlreadyInSession,

    #[error("object is not attached to a session")]
    NoSessionAttached,

    // -- XML schema config --
    #[error("schema config parse error: {0}")]
    XmlParse(String),

    #[error("mandatory attribute '{attr}' not found or empty while parsing element '{element}'")]
    MandatoryAttributeAbsent { element: String, attr: String },

    #[error("type '{ty}' is unknown and not supported while parsing field '{field}'")]
    WrongColumnType { ty: String, field: String },

    #[error("invalid element-attribute combination: {0}")]
    InvalidCombination(String),
}

impl OrmError {
    pub fn bad_sql(msg: impl Into<String>) -> Self {
        OrmError::BadSqlOperation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        OrmError::IntegrityCheckFailed(msg.into())
    }
}
