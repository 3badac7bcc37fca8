use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Postgres type OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Built-in Postgres types with a fixed target mapping. These are referenced
/// inline and never declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    // "char", the single byte internal type
    Char,
    // Integer Types
    Int2,
    Int4,
    Int8,
    Oid,
    // Text types
    Text,
    VarChar,
    BpChar,
    Name,
    Bytea,
    // Json types
    Json,
    Jsonb,
    // Numeric types
    Float4,
    Float8,
    Numeric,
    Money,
    // Time types
    Date,
    Time { tz: bool },
    Timestamp { tz: bool },
    Interval,
    // Network types
    Uuid,
    Inet,
    Cidr,
    MacAddr,
    Bit,
    VarBit,
    Void,
    Array(Box<ScalarType>),
}

const BUILTIN_TYPES: &[(u32, ScalarType)] = &[
    (16, ScalarType::Bool),
    (17, ScalarType::Bytea),
    (18, ScalarType::Char),
    (19, ScalarType::Name),
    (20, ScalarType::Int8),
    (21, ScalarType::Int2),
    (23, ScalarType::Int4),
    (25, ScalarType::Text),
    (26, ScalarType::Oid),
    (114, ScalarType::Json),
    (650, ScalarType::Cidr),
    (700, ScalarType::Float4),
    (701, ScalarType::Float8),
    (790, ScalarType::Money),
    (829, ScalarType::MacAddr),
    (869, ScalarType::Inet),
    (1042, ScalarType::BpChar),
    (1043, ScalarType::VarChar),
    (1082, ScalarType::Date),
    (1083, ScalarType::Time { tz: false }),
    (1114, ScalarType::Timestamp { tz: false }),
    (1184, ScalarType::Timestamp { tz: true }),
    (1186, ScalarType::Interval),
    (1266, ScalarType::Time { tz: true }),
    (1560, ScalarType::Bit),
    (1562, ScalarType::VarBit),
    (1700, ScalarType::Numeric),
    (2278, ScalarType::Void),
    (2950, ScalarType::Uuid),
    (3802, ScalarType::Jsonb),
];

// (array oid, element oid)
const BUILTIN_ARRAYS: &[(u32, u32)] = &[
    (199, 114),
    (651, 650),
    (791, 790),
    (1000, 16),
    (1001, 17),
    (1002, 18),
    (1003, 19),
    (1005, 21),
    (1007, 23),
    (1009, 25),
    (1014, 1042),
    (1015, 1043),
    (1016, 20),
    (1021, 700),
    (1022, 701),
    (1028, 26),
    (1040, 829),
    (1041, 869),
    (1115, 1114),
    (1182, 1082),
    (1183, 1083),
    (1185, 1184),
    (1187, 1186),
    (1231, 1700),
    (1270, 1266),
    (1561, 1560),
    (1563, 1562),
    (2951, 2950),
    (3807, 3802),
];

impl ScalarType {
    /// Looks up the fixed mapping for a well-known OID.
    pub fn builtin(type_id: TypeId) -> Option<Self> {
        if let Some((_, scalar)) = BUILTIN_TYPES.iter().find(|(oid, _)| *oid == type_id.0) {
            return Some(scalar.clone());
        }
        let (_, elem) = BUILTIN_ARRAYS.iter().find(|(oid, _)| *oid == type_id.0)?;
        let elem = Self::builtin(TypeId(*elem))?;
        Some(Self::Array(Box::new(elem)))
    }

    /// The Rust type generated code uses for this scalar with the sqlx `postgres` driver.
    pub fn rust_type(&self) -> String {
        let name = match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "i8",
            ScalarType::Int2 => "i16",
            ScalarType::Int4 => "i32",
            ScalarType::Int8 => "i64",
            ScalarType::Oid => "sqlx::postgres::types::Oid",
            ScalarType::Text | ScalarType::VarChar | ScalarType::BpChar | ScalarType::Name => {
                "String"
            }
            ScalarType::Bytea => "Vec<u8>",
            ScalarType::Json | ScalarType::Jsonb => "sqlx::types::JsonValue",
            ScalarType::Float4 => "f32",
            ScalarType::Float8 => "f64",
            ScalarType::Numeric => "sqlx::types::Decimal",
            ScalarType::Money => "sqlx::postgres::types::PgMoney",
            ScalarType::Date => "time::Date",
            ScalarType::Time { tz: false } => "time::Time",
            ScalarType::Time { tz: true } => "sqlx::postgres::types::PgTimeTz",
            ScalarType::Timestamp { tz: false } => "time::PrimitiveDateTime",
            ScalarType::Timestamp { tz: true } => "time::OffsetDateTime",
            ScalarType::Interval => "sqlx::postgres::types::PgInterval",
            ScalarType::Uuid => "sqlx::types::Uuid",
            ScalarType::Inet | ScalarType::Cidr => "sqlx::types::ipnetwork::IpNetwork",
            ScalarType::MacAddr => "sqlx::types::mac_address::MacAddress",
            ScalarType::Bit | ScalarType::VarBit => "sqlx::types::BitVec",
            ScalarType::Void => "()",
            ScalarType::Array(elem) => return format!("Vec<{}>", elem.rust_type()),
        };
        name.to_owned()
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Char => write!(f, "\"char\""),
            ScalarType::Int2 => write!(f, "int2"),
            ScalarType::Int4 => write!(f, "int4"),
            ScalarType::Int8 => write!(f, "int8"),
            ScalarType::Oid => write!(f, "oid"),
            ScalarType::Text => write!(f, "text"),
            ScalarType::VarChar => write!(f, "varchar"),
            ScalarType::BpChar => write!(f, "bpchar"),
            ScalarType::Name => write!(f, "name"),
            ScalarType::Bytea => write!(f, "bytea"),
            ScalarType::Json => write!(f, "json"),
            ScalarType::Jsonb => write!(f, "jsonb"),
            ScalarType::Float4 => write!(f, "float4"),
            ScalarType::Float8 => write!(f, "float8"),
            ScalarType::Numeric => write!(f, "numeric"),
            ScalarType::Money => write!(f, "money"),
            ScalarType::Date => write!(f, "date"),
            ScalarType::Time { tz } => write!(f, "{}", if *tz { "timetz" } else { "time" }),
            ScalarType::Timestamp { tz } => {
                write!(f, "{}", if *tz { "timestamptz" } else { "timestamp" })
            }
            ScalarType::Interval => write!(f, "interval"),
            ScalarType::Uuid => write!(f, "uuid"),
            ScalarType::Inet => write!(f, "inet"),
            ScalarType::Cidr => write!(f, "cidr"),
            ScalarType::MacAddr => write!(f, "macaddr"),
            ScalarType::Bit => write!(f, "bit"),
            ScalarType::VarBit => write!(f, "varbit"),
            ScalarType::Void => write!(f, "void"),
            ScalarType::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub type_id: TypeId,
    /// Schema qualified Postgres name, like `public.user_status`.
    pub pg_name: String,
    pub name: String,
    /// Labels in `enumsortorder`.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeField {
    pub pg_name: String,
    pub name: String,
    pub ty: Arc<ResolvedType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeType {
    pub type_id: TypeId,
    pub pg_name: String,
    pub name: String,
    /// Fields in attribute order.
    pub fields: Vec<CompositeField>,
}

/// An array whose element needs its own declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayType {
    pub type_id: TypeId,
    pub pg_name: String,
    pub name: String,
    pub elem: Arc<ResolvedType>,
}

/// A database type after resolution. Resolution is memoized per run, so one
/// type id always maps to one `Arc<ResolvedType>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedType {
    Scalar { type_id: TypeId, scalar: ScalarType },
    Enum(EnumType),
    Composite(CompositeType),
    Array(ArrayType),
}

impl ResolvedType {
    pub fn type_id(&self) -> TypeId {
        match self {
            ResolvedType::Scalar { type_id, .. } => *type_id,
            ResolvedType::Enum(enum_type) => enum_type.type_id,
            ResolvedType::Composite(composite) => composite.type_id,
            ResolvedType::Array(array) => array.type_id,
        }
    }

    /// The generated name for types that need a declaration.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            ResolvedType::Scalar { .. } => None,
            ResolvedType::Enum(enum_type) => Some(&enum_type.name),
            ResolvedType::Composite(composite) => Some(&composite.name),
            ResolvedType::Array(array) => Some(&array.name),
        }
    }

    pub fn pg_name(&self) -> String {
        match self {
            ResolvedType::Scalar { scalar, .. } => scalar.to_string(),
            ResolvedType::Enum(enum_type) => enum_type.pg_name.clone(),
            ResolvedType::Composite(composite) => composite.pg_name.clone(),
            ResolvedType::Array(array) => array.pg_name.clone(),
        }
    }

    pub fn rust_type(&self) -> String {
        match self {
            ResolvedType::Scalar { scalar, .. } => scalar.rust_type(),
            ResolvedType::Enum(EnumType { name, .. })
            | ResolvedType::Composite(CompositeType { name, .. })
            | ResolvedType::Array(ArrayType { name, .. }) => name.clone(),
        }
    }
}

impl Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.declared_name() {
            Some(name) => write!(f, "{name} ({})", self.pg_name()),
            None => write!(f, "{}", self.pg_name()),
        }
    }
}
