//! Error types for ormscope operations.

use std::fmt;

/// The primary error type for all ormscope operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close, lost handle)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Schema errors (DDL, missing tables)
    Schema(SchemaError),
    /// Statement compilation errors
    Compile(CompileError),
    /// Mapper, property and instance-state errors
    Inspection(InspectionError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: BoxedSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The database could not be opened
    Connect,
    /// The handle was already closed
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: BoxedSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

/// A value did not convert to the requested Rust type.
#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl TypeError {
    pub fn new(expected: &'static str, actual: impl Into<String>) -> Self {
        Self {
            expected,
            actual: actual.into(),
            column: None,
        }
    }

    /// Attach the column the value came from.
    #[must_use]
    pub fn in_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
    pub source: BoxedSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table not found
    TableNotFound,
    /// Column not found
    ColumnNotFound,
    /// Invalid schema definition
    Invalid,
}

/// Failure while turning a statement into SQL text and parameters.
#[derive(Debug)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A bind parameter had no value at execution time
    MissingParameter,
    /// `.values()` or a parameter set named a key the table does not have
    UnknownColumn,
    /// The statement cannot be rendered (empty column list, bad construct)
    Unsupported,
}

/// Failure raised by the inspection and unit-of-work layer.
#[derive(Debug)]
pub struct InspectionError {
    pub kind: InspectionErrorKind,
    /// The mapped class involved, when known.
    pub class: Option<String>,
    /// The attribute key involved, when known.
    pub attribute: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionErrorKind {
    /// The requested attribute or capability does not exist on this object
    NoSuchAttribute,
    /// The object is in a state that does not allow the operation
    InvalidState,
    /// The class has no mapper in the registry
    UnmappedClass,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: BoxedSource,
}

impl Error {
    /// Shorthand for a `NoSuchAttribute` inspection error.
    pub fn no_such_attribute(
        class: impl Into<String>,
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Inspection(InspectionError {
            kind: InspectionErrorKind::NoSuchAttribute,
            class: Some(class.into()),
            attribute: Some(attribute.into()),
            message: message.into(),
        })
    }

    /// Shorthand for an `InvalidState` inspection error.
    pub fn invalid_state(class: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Inspection(InspectionError {
            kind: InspectionErrorKind::InvalidState,
            class: Some(class.into()),
            attribute: None,
            message: message.into(),
        })
    }

    /// Shorthand for a compile error.
    pub fn compile(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Error::Compile(CompileError {
            kind,
            message: message.into(),
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Is this a "no such attribute" inspection failure?
    pub fn is_no_such_attribute(&self) -> bool {
        matches!(
            self,
            Error::Inspection(InspectionError {
                kind: InspectionErrorKind::NoSuchAttribute,
                ..
            })
        )
    }

    /// Is this a connection error that likely requires reopening?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Compile(e) => write!(f, "Compile error: {}", e.message),
            Error::Inspection(e) => write!(f, "Inspection error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

pub type BoxedSource = Option<Box<dyn std::error::Error + Send + Sync>>;

fn boxed(source: &BoxedSource) -> Option<&(dyn std::error::Error + 'static)> {
    source
        .as_deref()
        .map(|err| err as &(dyn std::error::Error + 'static))
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => boxed(&e.source),
            Error::Query(e) => boxed(&e.source),
            Error::Schema(e) => boxed(&e.source),
            Error::Config(e) => boxed(&e.source),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(f, "column '{col}': ")?;
        }
        write!(f, "expected {}, found {}", self.expected, self.actual)
    }
}

impl fmt::Display for InspectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.class, &self.attribute) {
            (Some(class), Some(attr)) => write!(f, "{}.{}: {}", class, attr, self.message),
            (Some(class), None) => write!(f, "{}: {}", class, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

macro_rules! message_display {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.message)
                }
            }
        )*
    };
}

message_display!(ConnectionError, QueryError, SchemaError, CompileError, ConfigError);

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

macro_rules! error_from {
    ($($variant:ident($ty:ident)),*) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Error::$variant(err)
                }
            }
        )*
    };
}

error_from!(
    Connection(ConnectionError),
    Query(QueryError),
    Type(TypeError),
    Schema(SchemaError),
    Compile(CompileError),
    Inspection(InspectionError),
    Config(ConfigError)
);

/// Result type alias for ormscope operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_is_carried_on_query_errors() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO users (id) VALUES (?1)".to_string()),
            message: "UNIQUE constraint failed: users.id".to_string(),
            source: None,
        });

        assert_eq!(err.sql(), Some("INSERT INTO users (id) VALUES (?1)"));
        assert_eq!(
            err.to_string(),
            "Query error: UNIQUE constraint failed: users.id"
        );
    }

    #[test]
    fn no_such_attribute_display() {
        let err = Error::no_such_attribute("User", "mapper", "not a relationship property");
        assert!(err.is_no_such_attribute());
        assert_eq!(
            err.to_string(),
            "Inspection error: User.mapper: not a relationship property"
        );
    }

    #[test]
    fn invalid_state_is_not_no_such_attribute() {
        let err = Error::invalid_state("Address", "instance is not persistent");
        assert!(!err.is_no_such_attribute());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn type_errors_name_their_column() {
        let err: Error = TypeError::new("i64", "TEXT").in_column("name").into();
        assert_eq!(
            err.to_string(),
            "Type error: column 'name': expected i64, found TEXT"
        );
        assert_eq!(
            Error::config("bad path").to_string(),
            "Configuration error: bad path"
        );
    }

    #[test]
    fn io_errors_expose_source() {
        use std::error::Error as _;
        let err: Error = std::io::Error::other("disk gone").into();
        assert!(err.is_connection_error());
        assert!(err.source().is_some());
    }
}
