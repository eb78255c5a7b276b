use crate::error::{TrendsError, TrendsResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperator {
    Exact,
    IsNot,
    Icontains,
    NotIcontains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    IsSet,
    IsNotSet,
}

impl FromStr for PropertyOperator {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(PropertyOperator::Exact),
            "is_not" => Ok(PropertyOperator::IsNot),
            "icontains" => Ok(PropertyOperator::Icontains),
            "not_icontains" => Ok(PropertyOperator::NotIcontains),
            "regex" => Ok(PropertyOperator::Regex),
            "not_regex" => Ok(PropertyOperator::NotRegex),
            "gt" => Ok(PropertyOperator::Gt),
            "lt" => Ok(PropertyOperator::Lt),
            "is_set" => Ok(PropertyOperator::IsSet),
            "is_not_set" => Ok(PropertyOperator::IsNotSet),
            other => Err(TrendsError::InvalidProperty(format!("unknown operator '{}'", other))),
        }
    }
}

/// Raw `{key, operator?, value}` as it arrives in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl PropertySpec {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator: None,
            value: value.into(),
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

/// A validated predicate over event properties. Predicates in a list AND-combine.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub key: String,
    pub operator: PropertyOperator,
    pub value: Value,
    pattern: Option<Regex>,
}

impl Predicate {
    pub fn new(key: impl Into<String>, operator: PropertyOperator, value: Value) -> TrendsResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(TrendsError::InvalidProperty("property key is empty".to_string()));
        }

        let pattern = match operator {
            PropertyOperator::Regex | PropertyOperator::NotRegex => {
                let source = value.as_str().ok_or_else(|| {
                    TrendsError::InvalidProperty(format!("regex for '{}' must be a string", key))
                })?;
                let compiled = Regex::new(source).map_err(|e| {
                    TrendsError::InvalidProperty(format!("bad regex for '{}': {}", key, e))
                })?;
                Some(compiled)
            }
            PropertyOperator::Gt | PropertyOperator::Lt => {
                if as_number(&value).is_none() {
                    return Err(TrendsError::InvalidProperty(format!(
                        "'{}' comparison needs a numeric value",
                        key
                    )));
                }
                None
            }
            _ => None,
        };

        Ok(Self {
            key,
            operator,
            value,
            pattern,
        })
    }

    pub fn exact(key: impl Into<String>, value: impl Into<Value>) -> TrendsResult<Self> {
        Self::new(key, PropertyOperator::Exact, value.into())
    }

    pub fn from_spec(spec: &PropertySpec) -> TrendsResult<Self> {
        let operator = match spec.operator.as_deref() {
            Some(op) => op.parse()?,
            None => PropertyOperator::Exact,
        };
        Self::new(spec.key.clone(), operator, spec.value.clone())
    }

    pub fn matches(&self, properties: &Map<String, Value>) -> bool {
        let actual = properties.get(&self.key).filter(|v| !v.is_null());

        match self.operator {
            PropertyOperator::IsSet => actual.is_some(),
            PropertyOperator::IsNotSet => actual.is_none(),
            PropertyOperator::Exact => actual.map_or(false, |v| self.equals_any(v)),
            PropertyOperator::IsNot => !actual.map_or(false, |v| self.equals_any(v)),
            PropertyOperator::Icontains => actual.map_or(false, |v| self.contains(v)),
            PropertyOperator::NotIcontains => !actual.map_or(false, |v| self.contains(v)),
            PropertyOperator::Regex => actual.map_or(false, |v| self.regex_match(v)),
            PropertyOperator::NotRegex => !actual.map_or(false, |v| self.regex_match(v)),
            PropertyOperator::Gt => self.compare(actual, |a, b| a > b),
            PropertyOperator::Lt => self.compare(actual, |a, b| a < b),
        }
    }

    fn equals_any(&self, actual: &Value) -> bool {
        match &self.value {
            Value::Array(options) => options.iter().any(|option| values_equal(actual, option)),
            expected => values_equal(actual, expected),
        }
    }

    fn contains(&self, actual: &Value) -> bool {
        let needle = as_text(&self.value).to_lowercase();
        as_text(actual).to_lowercase().contains(&needle)
    }

    fn regex_match(&self, actual: &Value) -> bool {
        self.pattern
            .as_ref()
            .map_or(false, |pattern| pattern.is_match(&as_text(actual)))
    }

    fn compare(&self, actual: Option<&Value>, op: fn(f64, f64) -> bool) -> bool {
        match (actual.and_then(as_number), as_number(&self.value)) {
            (Some(a), Some(b)) => op(a, b),
            _ => false,
        }
    }
}

pub fn all_match(predicates: &[Predicate], properties: &Map<String, Value>) -> bool {
    predicates.iter().all(|p| p.matches(properties))
}

/// Numbers and numeric strings both count as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (actual, expected) {
        return a.as_f64() == b.as_f64();
    }
    as_text(actual) == as_text(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_exact_match() {
        let predicate = Predicate::exact("$current_url", "http://example.org").unwrap();
        assert!(predicate.matches(&props(json!({"$current_url": "http://example.org"}))));
        assert!(!predicate.matches(&props(json!({"$current_url": "http://other.org"}))));
        assert!(!predicate.matches(&props(json!({}))));
    }

    #[test]
    fn test_exact_compares_numbers_and_strings() {
        let predicate = Predicate::exact("session duration", 200).unwrap();
        assert!(predicate.matches(&props(json!({"session duration": 200.0}))));
        assert!(predicate.matches(&props(json!({"session duration": "200"}))));
    }

    #[test]
    fn test_exact_with_list_is_any_of() {
        let predicate = Predicate::exact("location", json!(["Paris", "Berlin"])).unwrap();
        assert!(predicate.matches(&props(json!({"location": "Paris"}))));
        assert!(!predicate.matches(&props(json!({"location": "London"}))));
    }

    #[test]
    fn test_negated_operators_accept_missing() {
        let is_not = Predicate::new("location", PropertyOperator::IsNot, json!("Paris")).unwrap();
        assert!(is_not.matches(&props(json!({}))));
        assert!(!is_not.matches(&props(json!({"location": "Paris"}))));

        let not_contains = Predicate::new("url", PropertyOperator::NotIcontains, json!("EXAMPLE")).unwrap();
        assert!(not_contains.matches(&props(json!({"url": null}))));
        assert!(!not_contains.matches(&props(json!({"url": "http://example.org"}))));
    }

    #[test]
    fn test_icontains_and_regex() {
        let contains = Predicate::new("url", PropertyOperator::Icontains, json!("EXAMPLE")).unwrap();
        assert!(contains.matches(&props(json!({"url": "http://example.org"}))));

        let regex = Predicate::new("url", PropertyOperator::Regex, json!(r"^https?://ex")).unwrap();
        assert!(regex.matches(&props(json!({"url": "http://example.org"}))));
        assert!(!regex.matches(&props(json!({"url": "ftp://example.org"}))));
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = Predicate::new("session duration", PropertyOperator::Gt, json!(300)).unwrap();
        assert!(gt.matches(&props(json!({"session duration": 400}))));
        assert!(!gt.matches(&props(json!({"session duration": 300}))));
        assert!(!gt.matches(&props(json!({"session duration": "long"}))));

        let lt = Predicate::new("session duration", PropertyOperator::Lt, json!("300")).unwrap();
        assert!(lt.matches(&props(json!({"session duration": 200}))));
    }

    #[test]
    fn test_is_set() {
        let set = Predicate::new("location", PropertyOperator::IsSet, Value::Null).unwrap();
        assert!(set.matches(&props(json!({"location": "Paris"}))));
        assert!(!set.matches(&props(json!({"location": null}))));

        let not_set = Predicate::new("location", PropertyOperator::IsNotSet, Value::Null).unwrap();
        assert!(not_set.matches(&props(json!({}))));
    }

    #[test]
    fn test_invalid_predicates() {
        assert!(Predicate::new("url", PropertyOperator::Regex, json!("(unclosed")).is_err());
        assert!(Predicate::new("n", PropertyOperator::Gt, json!("abc")).is_err());
        assert!(Predicate::new("", PropertyOperator::Exact, json!("x")).is_err());

        let spec = PropertySpec::new("url", "x").with_operator("sounds_like");
        assert!(matches!(Predicate::from_spec(&spec), Err(TrendsError::InvalidProperty(_))));
    }

    #[test]
    fn test_all_match_is_conjunction() {
        let predicates = vec![
            Predicate::exact("location", "London").unwrap(),
            Predicate::new("session duration", PropertyOperator::Gt, json!(400)).unwrap(),
        ];
        assert!(all_match(&predicates, &props(json!({"location": "London", "session duration": 500}))));
        assert!(!all_match(&predicates, &props(json!({"location": "London", "session duration": 400}))));
        assert!(all_match(&[], &props(json!({}))));
    }
}
