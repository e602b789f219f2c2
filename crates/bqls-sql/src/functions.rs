//! Builtin function catalog
//!
//! Each function carries its overloads so that calls can be type-checked
//! and so hover can print the signatures BigQuery documents. Operators are
//! registered under `$`-prefixed internal names.

use bqls_core::SqlType;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Type accepted by one parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Concrete(SqlType),
    /// Any type
    Any,
    /// Any ARRAY type
    AnyArray,
    /// Date part keyword such as `DAY` or `MONTH`
    DatePart,
}

impl ParamType {
    fn accepts(&self, arg: &SqlType, exact: bool) -> bool {
        match self {
            ParamType::Concrete(ty) if exact => arg == ty || *arg == SqlType::Unknown,
            ParamType::Concrete(ty) => arg.coerces_to(ty),
            ParamType::Any => true,
            ParamType::AnyArray => matches!(arg, SqlType::Array { .. } | SqlType::Unknown),
            ParamType::DatePart => *arg == SqlType::Unknown,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::Concrete(ty) => write!(f, "{ty}"),
            ParamType::Any => write!(f, "ANY TYPE"),
            ParamType::AnyArray => write!(f, "ARRAY<ANY TYPE>"),
            ParamType::DatePart => write!(f, "DATE_PART"),
        }
    }
}

/// One parameter slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Required(ParamType),
    Optional(ParamType),
    Repeated(ParamType),
}

/// How the result type is derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultType {
    Concrete(SqlType),
    /// Same type as the argument at this index
    Arg(usize),
    /// ARRAY of the argument at this index
    ArrayOfArg(usize),
    /// Element type of the array argument at this index
    ElementOfArg(usize),
}

/// A single overload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub result: ResultType,
}

impl Signature {
    fn new(params: Vec<Param>, result: ResultType) -> Self {
        Self { params, result }
    }

    /// Whether `args` fit this overload
    pub fn matches(&self, args: &[SqlType], exact: bool) -> bool {
        let mut remaining = args;
        for param in &self.params {
            match param {
                Param::Required(ty) => match remaining.split_first() {
                    Some((arg, rest)) if ty.accepts(arg, exact) => remaining = rest,
                    _ => return false,
                },
                Param::Optional(ty) => {
                    if let Some((arg, rest)) = remaining.split_first() {
                        if !ty.accepts(arg, exact) {
                            return false;
                        }
                        remaining = rest;
                    }
                }
                Param::Repeated(ty) => {
                    if !remaining.iter().all(|arg| ty.accepts(arg, exact)) {
                        return false;
                    }
                    remaining = &[];
                }
            }
        }
        remaining.is_empty()
    }

    /// Result type for the given arguments
    pub fn result_type(&self, args: &[SqlType]) -> SqlType {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(SqlType::Unknown);
        match &self.result {
            ResultType::Concrete(ty) => ty.clone(),
            ResultType::Arg(i) => arg(*i),
            ResultType::ArrayOfArg(i) => SqlType::array_of(arg(*i)),
            ResultType::ElementOfArg(i) => match arg(*i) {
                SqlType::Array { element_type } => *element_type,
                _ => SqlType::Unknown,
            },
        }
    }

    /// Signature text such as `SUBSTR(STRING, INT64, [INT64]) -> STRING`
    pub fn debug_string(&self, name: &str) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match p {
                Param::Required(ty) => ty.to_string(),
                Param::Optional(ty) => format!("[{ty}]"),
                Param::Repeated(ty) => format!("[{ty}, ...]"),
            })
            .collect();

        let result = match &self.result {
            ResultType::Concrete(ty) => ty.to_string(),
            ResultType::Arg(i) => self.param_type_name(*i),
            ResultType::ArrayOfArg(i) => format!("ARRAY<{}>", self.param_type_name(*i)),
            ResultType::ElementOfArg(_) => "ANY TYPE".to_string(),
        };

        format!("{}({}) -> {}", name, params.join(", "), result)
    }

    fn param_type_name(&self, index: usize) -> String {
        match self.params.get(index) {
            Some(Param::Required(ty) | Param::Optional(ty) | Param::Repeated(ty)) => ty.to_string(),
            None => "ANY TYPE".to_string(),
        }
    }
}

/// A builtin function or operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// SQL name (`UPPER`) or internal operator name (`$add`)
    pub name: String,
    pub signatures: Vec<Signature>,
    pub aggregate: bool,
    /// Only valid with an `OVER` clause (`ROW_NUMBER`, `LAG`, ...)
    pub analytic: bool,
}

impl Function {
    /// Whether this is an operator rather than a named function
    pub fn is_operator(&self) -> bool {
        self.name.starts_with('$')
    }

    /// Aggregates may also be windowed
    pub fn supports_over(&self) -> bool {
        self.analytic || self.aggregate
    }

    /// Pick the overload for `args`
    ///
    /// Exact matches win over matches that need implicit coercion, so that
    /// `ROUND(NUMERIC)` stays NUMERIC while `ROUND(INT64)` widens to FLOAT64.
    pub fn resolve(&self, args: &[SqlType]) -> Option<(&Signature, SqlType)> {
        [true, false].into_iter().find_map(|exact| {
            self.signatures
                .iter()
                .find(|sig| sig.matches(args, exact))
                .map(|sig| (sig, sig.result_type(args)))
        })
    }

    /// All signatures rendered one per line
    pub fn signatures_text(&self) -> String {
        self.signatures
            .iter()
            .map(|s| s.debug_string(&self.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Look up a builtin by name (case-insensitive)
pub fn lookup(name: &str) -> Option<Arc<Function>> {
    builtins().get(&name.to_uppercase()).cloned()
}

/// Look up an operator by its internal name
pub fn operator(name: &str) -> Option<Arc<Function>> {
    builtins().get(name).cloned()
}

/// Date part keywords accepted by DATE_TRUNC and friends
pub fn is_date_part(name: &str) -> bool {
    const PARTS: &[&str] = &[
        "MICROSECOND", "MILLISECOND", "SECOND", "MINUTE", "HOUR", "DAY", "DAYOFWEEK", "DAYOFYEAR",
        "WEEK", "ISOWEEK", "MONTH", "QUARTER", "YEAR", "ISOYEAR",
    ];
    PARTS.iter().any(|p| p.eq_ignore_ascii_case(name))
}

fn builtins() -> &'static HashMap<String, Arc<Function>> {
    static BUILTINS: OnceLock<HashMap<String, Arc<Function>>> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let mut registry = Registry::default();
        registry.register_operators();
        registry.register_aggregates();
        registry.register_analytics();
        registry.register_scalars();
        registry.functions
    })
}

// Shorthands for the registry tables below
use Param::{Optional as Opt, Repeated as Rep, Required as Req};
use ParamType::{Any, AnyArray, Concrete as T, DatePart};

fn c(ty: SqlType) -> ResultType {
    ResultType::Concrete(ty)
}

#[derive(Default)]
struct Registry {
    functions: HashMap<String, Arc<Function>>,
}

impl Registry {
    fn add(&mut self, name: &str, aggregate: bool, analytic: bool, signatures: Vec<Signature>) {
        self.functions.insert(
            name.to_string(),
            Arc::new(Function {
                name: name.to_string(),
                signatures,
                aggregate,
                analytic,
            }),
        );
    }

    fn scalar(&mut self, name: &str, signatures: Vec<Signature>) {
        self.add(name, false, false, signatures);
    }

    fn aggregate(&mut self, name: &str, signatures: Vec<Signature>) {
        self.add(name, true, false, signatures);
    }

    fn analytic(&mut self, name: &str, signatures: Vec<Signature>) {
        self.add(name, false, true, signatures);
    }

    fn register_operators(&mut self) {
        use SqlType::*;

        let arithmetic = || {
            [Int64, Numeric, BigNumeric, Float64]
                .into_iter()
                .map(|ty| Signature::new(vec![Req(T(ty.clone())), Req(T(ty.clone()))], c(ty)))
                .collect::<Vec<_>>()
        };
        self.scalar("$add", arithmetic());
        self.scalar("$subtract", arithmetic());
        self.scalar("$multiply", arithmetic());
        self.scalar(
            "$divide",
            vec![
                Signature::new(vec![Req(T(Numeric)), Req(T(Numeric))], c(Numeric)),
                Signature::new(vec![Req(T(BigNumeric)), Req(T(BigNumeric))], c(BigNumeric)),
                Signature::new(vec![Req(T(Float64)), Req(T(Float64))], c(Float64)),
            ],
        );
        self.scalar(
            "$unary_minus",
            [Int64, Numeric, BigNumeric, Float64]
                .into_iter()
                .map(|ty| Signature::new(vec![Req(T(ty.clone()))], c(ty)))
                .collect(),
        );

        for name in ["$equal", "$not_equal", "$less", "$greater", "$less_or_equal", "$greater_or_equal"] {
            self.scalar(name, vec![Signature::new(vec![Req(Any), Req(Any)], c(Bool))]);
        }

        let like = vec![
            Signature::new(vec![Req(T(String)), Req(T(String))], c(Bool)),
            Signature::new(vec![Req(T(Bytes)), Req(T(Bytes))], c(Bool)),
        ];
        self.scalar("$like", like.clone());
        self.scalar("$not_like", like);

        self.scalar(
            "$concat_op",
            vec![
                Signature::new(vec![Req(T(String)), Req(T(String))], c(String)),
                Signature::new(vec![Req(T(Bytes)), Req(T(Bytes))], c(Bytes)),
            ],
        );
        self.scalar("$and", vec![Signature::new(vec![Req(T(Bool)), Req(T(Bool))], c(Bool))]);
        self.scalar("$or", vec![Signature::new(vec![Req(T(Bool)), Req(T(Bool))], c(Bool))]);
        self.scalar("$not", vec![Signature::new(vec![Req(T(Bool))], c(Bool))]);
        self.scalar("$is_null", vec![Signature::new(vec![Req(Any)], c(Bool))]);
        self.scalar("$in", vec![Signature::new(vec![Req(Any), Rep(Any)], c(Bool))]);
        self.scalar(
            "$between",
            vec![Signature::new(vec![Req(Any), Req(Any), Req(Any)], c(Bool))],
        );
        self.scalar(
            "$case",
            vec![Signature::new(vec![Rep(Any)], ResultType::Arg(0))],
        );

        self.scalar("$make_array", vec![Signature::new(vec![Rep(Any)], ResultType::ArrayOfArg(0))]);
        self.scalar("$in_array", vec![Signature::new(vec![Req(Any), Req(AnyArray)], c(Bool))]);
        for name in ["$array_at_offset", "$safe_array_at_offset", "$array_at_ordinal", "$safe_array_at_ordinal"] {
            self.scalar(
                name,
                vec![Signature::new(vec![Req(AnyArray), Req(T(Int64))], ResultType::ElementOfArg(0))],
            );
        }
        self.scalar("$interval", vec![Signature::new(vec![Req(Any)], c(Interval))]);
    }

    fn register_analytics(&mut self) {
        use SqlType::*;

        for name in ["ROW_NUMBER", "RANK", "DENSE_RANK"] {
            self.analytic(name, vec![Signature::new(vec![], c(Int64))]);
        }
        self.analytic("NTILE", vec![Signature::new(vec![Req(T(Int64))], c(Int64))]);
        for name in ["PERCENT_RANK", "CUME_DIST"] {
            self.analytic(name, vec![Signature::new(vec![], c(Float64))]);
        }
        for name in ["LAG", "LEAD"] {
            self.analytic(
                name,
                vec![Signature::new(
                    vec![Req(Any), Opt(T(Int64)), Opt(Any)],
                    ResultType::Arg(0),
                )],
            );
        }
        for name in ["FIRST_VALUE", "LAST_VALUE"] {
            self.analytic(name, vec![Signature::new(vec![Req(Any)], ResultType::Arg(0))]);
        }
        self.analytic(
            "NTH_VALUE",
            vec![Signature::new(vec![Req(Any), Req(T(Int64))], ResultType::Arg(0))],
        );
    }

    fn register_aggregates(&mut self) {
        use SqlType::*;

        self.aggregate(
            "COUNT",
            vec![
                Signature::new(vec![], c(Int64)),
                Signature::new(vec![Req(Any)], c(Int64)),
            ],
        );
        self.aggregate("COUNTIF", vec![Signature::new(vec![Req(T(Bool))], c(Int64))]);
        self.aggregate(
            "SUM",
            [Int64, Numeric, BigNumeric, Float64]
                .into_iter()
                .map(|ty| Signature::new(vec![Req(T(ty.clone()))], c(ty)))
                .collect(),
        );
        self.aggregate(
            "AVG",
            vec![
                Signature::new(vec![Req(T(Int64))], c(Float64)),
                Signature::new(vec![Req(T(Numeric))], c(Numeric)),
                Signature::new(vec![Req(T(BigNumeric))], c(BigNumeric)),
                Signature::new(vec![Req(T(Float64))], c(Float64)),
            ],
        );
        for name in ["MIN", "MAX", "ANY_VALUE"] {
            self.aggregate(name, vec![Signature::new(vec![Req(Any)], ResultType::Arg(0))]);
        }
        self.aggregate(
            "ARRAY_AGG",
            vec![Signature::new(vec![Req(Any)], ResultType::ArrayOfArg(0))],
        );
        self.aggregate(
            "STRING_AGG",
            vec![
                Signature::new(vec![Req(T(String)), Opt(T(String))], c(String)),
                Signature::new(vec![Req(T(Bytes)), Opt(T(Bytes))], c(Bytes)),
            ],
        );
        self.aggregate(
            "LOGICAL_AND",
            vec![Signature::new(vec![Req(T(Bool))], c(Bool))],
        );
        self.aggregate(
            "LOGICAL_OR",
            vec![Signature::new(vec![Req(T(Bool))], c(Bool))],
        );
    }

    fn register_scalars(&mut self) {
        use SqlType::*;

        let string_or_bytes = |extra: Vec<Param>| {
            vec![
                Signature::new(
                    std::iter::once(Req(T(String))).chain(extra.clone()).collect(),
                    c(String),
                ),
                Signature::new(std::iter::once(Req(T(Bytes))).chain(extra).collect(), c(Bytes)),
            ]
        };
        for name in ["UPPER", "LOWER", "REVERSE"] {
            self.scalar(name, string_or_bytes(vec![]));
        }
        for name in ["TRIM", "LTRIM", "RTRIM"] {
            self.scalar(
                name,
                vec![
                    Signature::new(vec![Req(T(String)), Opt(T(String))], c(String)),
                    Signature::new(vec![Req(T(Bytes)), Opt(T(Bytes))], c(Bytes)),
                ],
            );
        }
        self.scalar(
            "LENGTH",
            vec![
                Signature::new(vec![Req(T(String))], c(Int64)),
                Signature::new(vec![Req(T(Bytes))], c(Int64)),
            ],
        );
        self.scalar(
            "CONCAT",
            vec![
                Signature::new(vec![Req(T(String)), Rep(T(String))], c(String)),
                Signature::new(vec![Req(T(Bytes)), Rep(T(Bytes))], c(Bytes)),
            ],
        );
        for name in ["SUBSTR", "SUBSTRING"] {
            self.scalar(name, string_or_bytes(vec![Req(T(Int64)), Opt(T(Int64))]));
        }
        self.scalar(
            "REPLACE",
            vec![Signature::new(
                vec![Req(T(String)), Req(T(String)), Req(T(String))],
                c(String),
            )],
        );
        self.scalar(
            "SPLIT",
            vec![Signature::new(
                vec![Req(T(String)), Opt(T(String))],
                c(SqlType::array_of(String)),
            )],
        );
        for name in ["STARTS_WITH", "ENDS_WITH", "REGEXP_CONTAINS"] {
            self.scalar(
                name,
                vec![Signature::new(vec![Req(T(String)), Req(T(String))], c(Bool))],
            );
        }
        self.scalar(
            "REGEXP_EXTRACT",
            vec![Signature::new(vec![Req(T(String)), Req(T(String))], c(String))],
        );
        self.scalar(
            "FORMAT",
            vec![Signature::new(vec![Req(T(String)), Rep(Any)], c(String))],
        );

        // Conditional
        self.scalar(
            "COALESCE",
            vec![Signature::new(vec![Req(Any), Rep(Any)], ResultType::Arg(0))],
        );
        self.scalar(
            "IFNULL",
            vec![Signature::new(vec![Req(Any), Req(Any)], ResultType::Arg(0))],
        );
        self.scalar(
            "NULLIF",
            vec![Signature::new(vec![Req(Any), Req(Any)], ResultType::Arg(0))],
        );
        self.scalar(
            "IF",
            vec![Signature::new(vec![Req(T(Bool)), Req(Any), Req(Any)], ResultType::Arg(1))],
        );
        for name in ["GREATEST", "LEAST"] {
            self.scalar(
                name,
                vec![Signature::new(vec![Req(Any), Rep(Any)], ResultType::Arg(0))],
            );
        }

        // Math
        self.scalar(
            "ABS",
            [Int64, Numeric, BigNumeric, Float64]
                .into_iter()
                .map(|ty| Signature::new(vec![Req(T(ty.clone()))], c(ty)))
                .collect(),
        );
        for name in ["ROUND", "TRUNC"] {
            self.scalar(
                name,
                vec![
                    Signature::new(vec![Req(T(Float64)), Opt(T(Int64))], c(Float64)),
                    Signature::new(vec![Req(T(Numeric)), Opt(T(Int64))], c(Numeric)),
                    Signature::new(vec![Req(T(BigNumeric)), Opt(T(Int64))], c(BigNumeric)),
                ],
            );
        }
        for name in ["CEIL", "FLOOR"] {
            self.scalar(
                name,
                vec![
                    Signature::new(vec![Req(T(Float64))], c(Float64)),
                    Signature::new(vec![Req(T(Numeric))], c(Numeric)),
                    Signature::new(vec![Req(T(BigNumeric))], c(BigNumeric)),
                ],
            );
        }
        for name in ["SAFE_DIVIDE", "POW", "MOD"] {
            self.scalar(
                name,
                vec![
                    Signature::new(vec![Req(T(Int64)), Req(T(Int64))], c(Float64)),
                    Signature::new(vec![Req(T(Numeric)), Req(T(Numeric))], c(Numeric)),
                    Signature::new(vec![Req(T(Float64)), Req(T(Float64))], c(Float64)),
                ],
            );
        }

        // Date and time
        self.scalar("CURRENT_DATE", vec![Signature::new(vec![Opt(T(String))], c(Date))]);
        self.scalar("CURRENT_DATETIME", vec![Signature::new(vec![Opt(T(String))], c(Datetime))]);
        self.scalar("CURRENT_TIMESTAMP", vec![Signature::new(vec![], c(Timestamp))]);
        self.scalar(
            "DATE",
            vec![
                Signature::new(vec![Req(T(Timestamp)), Opt(T(String))], c(Date)),
                Signature::new(vec![Req(T(Datetime))], c(Date)),
                Signature::new(vec![Req(T(Int64)), Req(T(Int64)), Req(T(Int64))], c(Date)),
            ],
        );
        self.scalar(
            "TIMESTAMP",
            vec![
                Signature::new(vec![Req(T(String)), Opt(T(String))], c(Timestamp)),
                Signature::new(vec![Req(T(Date)), Opt(T(String))], c(Timestamp)),
                Signature::new(vec![Req(T(Datetime)), Opt(T(String))], c(Timestamp)),
            ],
        );
        self.scalar(
            "DATE_TRUNC",
            vec![Signature::new(vec![Req(T(Date)), Req(DatePart)], c(Date))],
        );
        self.scalar(
            "TIMESTAMP_TRUNC",
            vec![Signature::new(
                vec![Req(T(Timestamp)), Req(DatePart), Opt(T(String))],
                c(Timestamp),
            )],
        );
        self.scalar(
            "EXTRACT",
            vec![Signature::new(vec![Req(DatePart), Req(Any)], c(Int64))],
        );
        for name in ["DATE_ADD", "DATE_SUB"] {
            self.scalar(name, vec![Signature::new(vec![Req(T(Date)), Req(T(Interval))], c(Date))]);
        }
        for name in ["TIMESTAMP_ADD", "TIMESTAMP_SUB"] {
            self.scalar(
                name,
                vec![Signature::new(vec![Req(T(Timestamp)), Req(T(Interval))], c(Timestamp))],
            );
        }
        self.scalar(
            "DATE_DIFF",
            vec![Signature::new(
                vec![Req(T(Date)), Req(T(Date)), Req(DatePart)],
                c(Int64),
            )],
        );
        self.scalar(
            "TIMESTAMP_DIFF",
            vec![Signature::new(
                vec![Req(T(Timestamp)), Req(T(Timestamp)), Req(DatePart)],
                c(Int64),
            )],
        );
        self.scalar(
            "FORMAT_DATE",
            vec![Signature::new(vec![Req(T(String)), Req(T(Date))], c(String))],
        );
        self.scalar(
            "FORMAT_TIMESTAMP",
            vec![Signature::new(
                vec![Req(T(String)), Req(T(Timestamp)), Opt(T(String))],
                c(String),
            )],
        );
        self.scalar(
            "PARSE_DATE",
            vec![Signature::new(vec![Req(T(String)), Req(T(String))], c(Date))],
        );
        self.scalar(
            "PARSE_TIMESTAMP",
            vec![Signature::new(
                vec![Req(T(String)), Req(T(String)), Opt(T(String))],
                c(Timestamp),
            )],
        );

        // Arrays, JSON, misc
        self.scalar("ARRAY_LENGTH", vec![Signature::new(vec![Req(AnyArray)], c(Int64))]);
        self.scalar(
            "ARRAY_TO_STRING",
            vec![Signature::new(
                vec![Req(T(SqlType::array_of(String))), Req(T(String)), Opt(T(String))],
                c(String),
            )],
        );
        self.scalar(
            "ARRAY_REVERSE",
            vec![Signature::new(vec![Req(AnyArray)], ResultType::Arg(0))],
        );
        self.scalar(
            "JSON_VALUE",
            vec![
                Signature::new(vec![Req(T(Json)), Opt(T(String))], c(String)),
                Signature::new(vec![Req(T(String)), Opt(T(String))], c(String)),
            ],
        );
        self.scalar("TO_JSON_STRING", vec![Signature::new(vec![Req(Any), Opt(T(Bool))], c(String))]);
        self.scalar("GENERATE_UUID", vec![Signature::new(vec![], c(String))]);
        self.scalar(
            "FARM_FINGERPRINT",
            vec![
                Signature::new(vec![Req(T(String))], c(Int64)),
                Signature::new(vec![Req(T(Bytes))], c(Int64)),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup("upper").is_some());
        assert!(lookup("UPPER").is_some());
        assert!(lookup("NO_SUCH_FUNCTION").is_none());
    }

    #[test]
    fn signature_text() {
        let substr = lookup("SUBSTR").unwrap();
        assert_eq!(
            substr.signatures_text(),
            "SUBSTR(STRING, INT64, [INT64]) -> STRING\nSUBSTR(BYTES, INT64, [INT64]) -> BYTES"
        );

        let concat = lookup("CONCAT").unwrap();
        assert!(concat
            .signatures_text()
            .starts_with("CONCAT(STRING, [STRING, ...]) -> STRING"));

        let max = lookup("MAX").unwrap();
        assert_eq!(max.signatures_text(), "MAX(ANY TYPE) -> ANY TYPE");
    }

    #[test]
    fn overload_resolution_prefers_exact_match() {
        let round = lookup("ROUND").unwrap();
        assert_eq!(round.resolve(&[SqlType::Numeric]).unwrap().1, SqlType::Numeric);
        assert_eq!(round.resolve(&[SqlType::Int64]).unwrap().1, SqlType::Float64);
        assert!(round.resolve(&[SqlType::String]).is_none());
    }

    #[test]
    fn arithmetic_widens() {
        let add = operator("$add").unwrap();
        assert_eq!(add.resolve(&[SqlType::Int64, SqlType::Int64]).unwrap().1, SqlType::Int64);
        assert_eq!(add.resolve(&[SqlType::Int64, SqlType::Float64]).unwrap().1, SqlType::Float64);
        assert!(add.resolve(&[SqlType::String, SqlType::Int64]).is_none());
    }

    #[test]
    fn optional_and_repeated_params() {
        let concat = lookup("CONCAT").unwrap();
        assert!(concat.resolve(&[SqlType::String]).is_some());
        assert!(concat
            .resolve(&[SqlType::String, SqlType::String, SqlType::String])
            .is_some());
        assert!(concat.resolve(&[]).is_none());

        let substr = lookup("SUBSTR").unwrap();
        assert!(substr.resolve(&[SqlType::String, SqlType::Int64]).is_some());
        assert!(substr
            .resolve(&[SqlType::String, SqlType::Int64, SqlType::Int64, SqlType::Int64])
            .is_none());
    }

    #[test]
    fn generic_result_types() {
        let agg = lookup("ARRAY_AGG").unwrap();
        assert!(agg.aggregate);
        assert_eq!(
            agg.resolve(&[SqlType::Date]).unwrap().1,
            SqlType::array_of(SqlType::Date)
        );

        let coalesce = lookup("COALESCE").unwrap();
        assert_eq!(
            coalesce.resolve(&[SqlType::String, SqlType::String]).unwrap().1,
            SqlType::String
        );
    }

    #[test]
    fn analytic_functions_need_a_window() {
        let row_number = lookup("ROW_NUMBER").unwrap();
        assert!(row_number.analytic && row_number.supports_over());
        assert_eq!(row_number.resolve(&[]).unwrap().1, SqlType::Int64);

        let lag = lookup("LAG").unwrap();
        assert_eq!(lag.resolve(&[SqlType::Date, SqlType::Int64]).unwrap().1, SqlType::Date);

        assert!(lookup("SUM").unwrap().supports_over());
        assert!(!lookup("UPPER").unwrap().supports_over());
    }

    #[test]
    fn array_operators() {
        let ints = SqlType::array_of(SqlType::Int64);
        let make = operator("$make_array").unwrap();
        assert_eq!(make.resolve(&[SqlType::Int64, SqlType::Int64]).unwrap().1, ints);

        let at = operator("$safe_array_at_ordinal").unwrap();
        assert_eq!(at.resolve(&[ints.clone(), SqlType::Int64]).unwrap().1, SqlType::Int64);
        assert!(at.resolve(&[SqlType::String, SqlType::Int64]).is_none());

        assert!(operator("$in_array").unwrap().resolve(&[SqlType::Int64, ints]).is_some());
    }

    #[test]
    fn operators_are_flagged() {
        assert!(operator("$equal").unwrap().is_operator());
        assert!(!lookup("COUNT").unwrap().is_operator());
        assert!(is_date_part("day"));
        assert!(!is_date_part("date"));
    }
}
