use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Input records and decision results are plain JSON object maps.
pub type JsonMap = serde_json::Map<String, Value>;

/// Input-role predicate: `(column value, full input hash) -> bool`.
pub type InFn = Arc<dyn Fn(&Value, &JsonMap) -> bool + Send + Sync>;

/// Output-role producer: `(input hash, output attrs under construction) -> value`.
/// `if:` guards read the attrs side; value producers read the input side.
pub type OutFn = Arc<dyn Fn(&JsonMap, &JsonMap) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcKind {
    Constant,
    Proc,
    Guard,
    Expression,
}

/// Compile-time result for one grid cell.
#[derive(Clone)]
pub enum CellValue {
    /// Blank cell: matches anything on input, contributes nothing on output.
    Empty,
    /// Literal value; compared via [`canonical`] form and eligible for indexing.
    Constant(Value),
    /// Compiled input predicate.
    Predicate { kind: ProcKind, func: InFn },
    /// Compiled output producer.
    Producer { kind: ProcKind, func: OutFn },
}

impl CellValue {
    pub fn is_constant(&self) -> bool {
        matches!(self, CellValue::Constant(_))
    }
}

impl fmt::Debug for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, "Empty"),
            CellValue::Constant(v) => write!(f, "Constant({})", v),
            CellValue::Predicate { kind, .. } => write!(f, "Predicate({:?})", kind),
            CellValue::Producer { kind, .. } => write!(f, "Producer({:?})", kind),
        }
    }
}

/// Per-cell compile context, derived from the table options and the column
/// the cell sits in.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    pub regexp_implicit: bool,
    /// Compiling for an output column (`out`, `if`, `set*` default cells).
    pub outs: bool,
    /// Column has no declared name (`guard:`, bare `cond:`, `if:`).
    pub anonymous: bool,
}

/// A cell matcher: inspects a cell string and, if it recognizes the shape,
/// compiles it. Matchers are tried in declared order; first claim wins.
pub trait Matcher: Send + Sync {
    fn matches(&self, cell: &str, ctx: &MatchContext) -> EngineResult<Option<CellValue>>;

    /// Whether this matcher also serves output-role columns.
    fn outs(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Range,
    Numeric,
    Pattern,
    Constant,
    Symbol,
    Guard,
}

/// Default matcher list, in dispatch order.
pub const DEFAULT_MATCHERS: [MatcherKind; 6] = [
    MatcherKind::Range,
    MatcherKind::Numeric,
    MatcherKind::Pattern,
    MatcherKind::Constant,
    MatcherKind::Symbol,
    MatcherKind::Guard,
];

impl MatcherKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "range" => Some(MatcherKind::Range),
            "numeric" => Some(MatcherKind::Numeric),
            "pattern" | "regexp" => Some(MatcherKind::Pattern),
            "constant" => Some(MatcherKind::Constant),
            "symbol" => Some(MatcherKind::Symbol),
            "guard" => Some(MatcherKind::Guard),
            _ => None,
        }
    }

    fn build(self) -> Box<dyn Matcher> {
        match self {
            MatcherKind::Range => Box::new(RangeMatcher),
            MatcherKind::Numeric => Box::new(NumericMatcher),
            MatcherKind::Pattern => Box::new(PatternMatcher),
            MatcherKind::Constant => Box::new(ConstantMatcher),
            MatcherKind::Symbol => Box::new(SymbolMatcher),
            MatcherKind::Guard => Box::new(GuardMatcher),
        }
    }
}

pub fn build_matchers(kinds: &[MatcherKind]) -> Vec<Box<dyn Matcher>> {
    kinds.iter().map(|k| k.build()).collect()
}

/// Run the matcher list over one trimmed cell. Empty cells are wildcards;
/// unclaimed cells fall back to a literal string constant.
pub fn compile_cell(
    cell: &str,
    matchers: &[Box<dyn Matcher>],
    ctx: &MatchContext,
) -> EngineResult<CellValue> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(CellValue::Empty);
    }
    for m in matchers {
        if ctx.outs && !m.outs() {
            continue;
        }
        if let Some(cv) = m.matches(trimmed, ctx)? {
            return Ok(cv);
        }
    }
    Ok(CellValue::Constant(Value::String(trimmed.to_string())))
}

// ---------------------------------------------------------------------------
// Value helpers shared by matchers, index keys and constant comparison.
// ---------------------------------------------------------------------------

/// Canonical string form of a scalar value. Integral numbers render without a
/// decimal point so a numeric cell `1` and an input `1.0` key identically.
/// `Null` (and containers) have no canonical form.
pub fn canonical(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Loose scalar equality: null equals null, everything else compares by
/// canonical form. Keeps constant matching agreeing with index-key lookup.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        _ => match (canonical(a), canonical(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Truthiness for guard cells: absent, null and false are falsy, everything
/// else (including "" and 0) is truthy.
pub fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

/// Build a JSON number, preferring the integer representation.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

// ---------------------------------------------------------------------------
// Range matcher: `min..max`, optionally negated with a leading `!`.
// ---------------------------------------------------------------------------

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A(!)?\s*(-?\w+(?:\.\w+)?)\.\.(-?\w+(?:\.\w+)?)\z").expect("range regex")
});

struct RangeMatcher;

impl Matcher for RangeMatcher {
    fn matches(&self, cell: &str, _ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        let Some(caps) = RANGE_RE.captures(cell) else {
            return Ok(None);
        };
        let negated = caps.get(1).is_some();
        let lo_raw = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        let hi_raw = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();

        let func: InFn = match (lo_raw.parse::<f64>(), hi_raw.parse::<f64>()) {
            (Ok(lo), Ok(hi)) => Arc::new(move |v: &Value, _: &JsonMap| {
                let hit = to_f64(v).map(|x| x >= lo && x <= hi).unwrap_or(false);
                hit != negated
            }),
            _ => Arc::new(move |v: &Value, _: &JsonMap| {
                let hit = canonical(v)
                    .map(|s| s.as_str() >= lo_raw.as_str() && s.as_str() <= hi_raw.as_str())
                    .unwrap_or(false);
                hit != negated
            }),
        };
        Ok(Some(CellValue::Predicate { kind: ProcKind::Proc, func }))
    }
}

// ---------------------------------------------------------------------------
// Numeric matcher: optional comparator + number. Bare and `=`/`==` forms stay
// constants so they remain indexable.
// ---------------------------------------------------------------------------

static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(>=|<=|!=|==|=|<|>)?\s*(-?\d+(?:\.\d+)?)\z").expect("numeric regex"));

struct NumericMatcher;

impl Matcher for NumericMatcher {
    fn matches(&self, cell: &str, ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        let Some(caps) = NUMERIC_RE.captures(cell) else {
            return Ok(None);
        };
        let comparator = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let n: f64 = match caps.get(2).map(|m| m.as_str()).unwrap_or("").parse() {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        if matches!(comparator, "" | "=" | "==") {
            return Ok(Some(CellValue::Constant(number_value(n))));
        }
        if ctx.outs {
            // Comparator forms are meaningless as output values.
            return Ok(None);
        }
        let func: InFn = match comparator {
            "!=" => Arc::new(move |v: &Value, _: &JsonMap| to_f64(v).map(|x| x != n).unwrap_or(false)),
            ">" => Arc::new(move |v: &Value, _: &JsonMap| to_f64(v).map(|x| x > n).unwrap_or(false)),
            ">=" => Arc::new(move |v: &Value, _: &JsonMap| to_f64(v).map(|x| x >= n).unwrap_or(false)),
            "<" => Arc::new(move |v: &Value, _: &JsonMap| to_f64(v).map(|x| x < n).unwrap_or(false)),
            "<=" => Arc::new(move |v: &Value, _: &JsonMap| to_f64(v).map(|x| x <= n).unwrap_or(false)),
            other => {
                return Err(EngineError::internal(
                    "bad_numeric_comparator".to_string(),
                    format!("unreachable numeric comparator '{}'", other),
                ))
            }
        };
        Ok(Some(CellValue::Predicate { kind: ProcKind::Proc, func }))
    }

    fn outs(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Pattern matcher: `=~ regexp`, `!~ regexp`, `!= literal`, plus implicit
// regexps when the table opts in.
// ---------------------------------------------------------------------------

static PATTERN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(=~|!~|!=)\s*(\S.*)\z").expect("pattern regex"));

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("non-word regex"));

struct PatternMatcher;

impl Matcher for PatternMatcher {
    fn matches(&self, cell: &str, ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        // Symbol references are never regexps.
        if cell.starts_with(':') {
            return Ok(None);
        }
        let (comparator, value) = match PATTERN_RE.captures(cell) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str()).unwrap_or(""),
                caps.get(2).map(|m| m.as_str()).unwrap_or("").trim().to_string(),
            ),
            None => {
                if !ctx.regexp_implicit || !NON_WORD_RE.is_match(cell) {
                    return Ok(None);
                }
                // Implicit form is promoted to `=~`.
                ("=~", cell.to_string())
            }
        };
        if value.starts_with(':') {
            return Ok(None);
        }

        let func: InFn = match comparator {
            "!=" => Arc::new(move |v: &Value, _: &JsonMap| {
                canonical(v).map(|s| s != value).unwrap_or(true)
            }),
            "=~" | "!~" => {
                let re = Regex::new(&value).map_err(|e| {
                    EngineError::cell(
                        "bad_regexp".to_string(),
                        format!("cell regexp '{}' does not compile: {}", value, e),
                    )
                })?;
                let negate = comparator == "!~";
                Arc::new(move |v: &Value, _: &JsonMap| {
                    let hit = v.as_str().map(|s| re.is_match(s)).unwrap_or(false);
                    hit != negate
                })
            }
            other => {
                return Err(EngineError::internal(
                    "bad_pattern_comparator".to_string(),
                    format!("unreachable pattern comparator '{}'", other),
                ))
            }
        };
        Ok(Some(CellValue::Predicate { kind: ProcKind::Proc, func }))
    }
}

// ---------------------------------------------------------------------------
// Constant matcher: explicitly typed constants `= nil`, `== true`, `:= 5`,
// `:= 'text'`.
// ---------------------------------------------------------------------------

static CONSTANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(?::=|==|=)\s*(\S.*)\z").expect("constant regex"));

struct ConstantMatcher;

impl Matcher for ConstantMatcher {
    fn matches(&self, cell: &str, _ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        let Some(caps) = CONSTANT_RE.captures(cell) else {
            return Ok(None);
        };
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
        Ok(typed_literal(raw).map(CellValue::Constant))
    }

    fn outs(&self) -> bool {
        true
    }
}

/// Recognize nil/boolean/numeric/quoted-string literals; bare words are not
/// claimed so they can fall through to other matchers.
fn typed_literal(raw: &str) -> Option<Value> {
    match raw {
        "nil" | "null" => return Some(Value::Null),
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(number_value(f));
    }
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            return Some(Value::String(raw[1..raw.len() - 1].to_string()));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Symbol matcher: compare the column value against another input field, or
// (output role) copy a named input field into the result.
// ---------------------------------------------------------------------------

static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(==|=|!=|<=|>=|<|>)?\s*:([A-Za-z_]\w*)\z").expect("symbol regex"));

struct SymbolMatcher;

impl Matcher for SymbolMatcher {
    fn matches(&self, cell: &str, ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        // Anonymous columns have no column value to compare; leave the cell
        // for the guard matcher.
        if ctx.anonymous {
            return Ok(None);
        }
        let Some(caps) = SYMBOL_RE.captures(cell) else {
            return Ok(None);
        };
        let comparator = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let name = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

        if ctx.outs {
            if !comparator.is_empty() {
                return Ok(None);
            }
            let func: OutFn = Arc::new(move |hash: &JsonMap, _attrs: &JsonMap| {
                hash.get(&name).cloned().unwrap_or(Value::Null)
            });
            return Ok(Some(CellValue::Producer { kind: ProcKind::Expression, func }));
        }

        let func: InFn = match comparator {
            "" | "=" | "==" => Arc::new(move |v: &Value, hash: &JsonMap| {
                loose_eq(v, hash.get(&name).unwrap_or(&Value::Null))
            }),
            "!=" => Arc::new(move |v: &Value, hash: &JsonMap| {
                !loose_eq(v, hash.get(&name).unwrap_or(&Value::Null))
            }),
            op => {
                let op = op.to_string();
                Arc::new(move |v: &Value, hash: &JsonMap| {
                    let field = hash.get(&name).and_then(to_f64);
                    let val = to_f64(v);
                    match (val, field) {
                        (Some(a), Some(b)) => match op.as_str() {
                            "<" => a < b,
                            "<=" => a <= b,
                            ">" => a > b,
                            ">=" => a >= b,
                            _ => false,
                        },
                        _ => false,
                    }
                })
            }
        };
        Ok(Some(CellValue::Predicate { kind: ProcKind::Proc, func }))
    }

    fn outs(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Guard matcher: predicates over the whole record. `:name op literal`, bare
// `:name` truthiness, `!:name` negated truthiness. In `if:` columns the same
// expressions run against the output attrs under construction.
// ---------------------------------------------------------------------------

static GUARD_EXPR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A:([A-Za-z_]\w*)\s*(=~|!~|!=|==|=|<=|>=|<|>)\s*(\S.*)\z").expect("guard regex")
});

static GUARD_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(!)?:([A-Za-z_]\w*)\z").expect("guard bare regex"));

struct GuardMatcher;

impl Matcher for GuardMatcher {
    fn matches(&self, cell: &str, ctx: &MatchContext) -> EngineResult<Option<CellValue>> {
        let test: Option<Arc<dyn Fn(&JsonMap) -> bool + Send + Sync>> =
            if let Some(caps) = GUARD_EXPR_RE.captures(cell) {
                let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                let op = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                let raw = caps.get(3).map(|m| m.as_str()).unwrap_or("").trim().to_string();
                Some(guard_comparison(name, op, &raw)?)
            } else if let Some(caps) = GUARD_BARE_RE.captures(cell) {
                let negated = caps.get(1).is_some();
                let name = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                Some(Arc::new(move |map: &JsonMap| truthy(map.get(&name)) != negated))
            } else {
                None
            };
        let Some(test) = test else {
            return Ok(None);
        };

        if ctx.outs {
            let func: OutFn =
                Arc::new(move |_hash: &JsonMap, attrs: &JsonMap| Value::Bool(test(attrs)));
            Ok(Some(CellValue::Producer { kind: ProcKind::Guard, func }))
        } else {
            let func: InFn = Arc::new(move |_v: &Value, hash: &JsonMap| test(hash));
            Ok(Some(CellValue::Predicate { kind: ProcKind::Guard, func }))
        }
    }

    fn outs(&self) -> bool {
        true
    }
}

fn guard_comparison(
    name: String,
    op: &str,
    raw: &str,
) -> EngineResult<Arc<dyn Fn(&JsonMap) -> bool + Send + Sync>> {
    match op {
        "=~" | "!~" => {
            let source = strip_quotes(raw).to_string();
            let re = Regex::new(&source).map_err(|e| {
                EngineError::cell(
                    "bad_regexp".to_string(),
                    format!("guard regexp '{}' does not compile: {}", source, e),
                )
            })?;
            let negate = op == "!~";
            Ok(Arc::new(move |map: &JsonMap| {
                let hit = map
                    .get(&name)
                    .and_then(Value::as_str)
                    .map(|s| re.is_match(s))
                    .unwrap_or(false);
                hit != negate
            }))
        }
        "=" | "==" => {
            let lit = guard_literal(raw);
            Ok(Arc::new(move |map: &JsonMap| {
                loose_eq(map.get(&name).unwrap_or(&Value::Null), &lit)
            }))
        }
        "!=" => {
            let lit = guard_literal(raw);
            Ok(Arc::new(move |map: &JsonMap| {
                !loose_eq(map.get(&name).unwrap_or(&Value::Null), &lit)
            }))
        }
        "<" | "<=" | ">" | ">=" => {
            let lit = guard_literal(raw);
            let op = op.to_string();
            Ok(Arc::new(move |map: &JsonMap| {
                let field = map.get(&name).and_then(to_f64);
                let bound = to_f64(&lit);
                match (field, bound) {
                    (Some(a), Some(b)) => match op.as_str() {
                        "<" => a < b,
                        "<=" => a <= b,
                        ">" => a > b,
                        ">=" => a >= b,
                        _ => false,
                    },
                    _ => false,
                }
            }))
        }
        other => Err(EngineError::internal(
            "bad_guard_comparator".to_string(),
            format!("unreachable guard comparator '{}'", other),
        )),
    }
}

fn strip_quotes(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

fn guard_literal(raw: &str) -> Value {
    if let Some(v) = typed_literal(raw) {
        return v;
    }
    Value::String(strip_quotes(raw).to_string())
}

#[cfg(test)]
#[path = "matchers_tests.rs"]
mod matchers_tests;
