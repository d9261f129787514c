//! Request parameters from the command line.
//!
//! `--params` takes a JSON object; each `--set key=value` then overrides one
//! field. Values that parse as JSON (numbers, booleans, arrays) keep their
//! type, anything else is sent as a string.

use anyhow::{bail, Context, Result};
use ovnk_common::RpcMethod;
use serde_json::{Map, Value};

pub fn parse_method(raw: &str) -> Result<RpcMethod> {
    serde_json::from_value(Value::String(raw.trim().to_string()))
        .with_context(|| format!("Unknown method: {}", raw))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn build_params(json: Option<&str>, sets: &[String]) -> Result<Option<Value>> {
    let mut params = match json {
        Some(raw) => match serde_json::from_str(raw).context("--params is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--params must be a JSON object"),
        },
        None => Map::new(),
    };

    for set in sets {
        let Some((key, value)) = set.split_once('=') else {
            bail!("--set expects key=value, got {}", set);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("--set key cannot be empty");
        }
        params.insert(key.to_string(), parse_value(value));
    }

    if params.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sets_override_json() {
        let params = build_params(
            Some(r#"{"target_type": "pod", "count": 2}"#),
            &["pod_name=client".into(), "count=4".into(), "ipv6=true".into()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            params,
            json!({"target_type": "pod", "pod_name": "client", "count": 4, "ipv6": true})
        );
    }

    #[test]
    fn test_bad_params() {
        assert!(build_params(Some("[1]"), &[]).is_err());
        assert!(build_params(None, &["novalue".into()]).is_err());
        assert!(build_params(None, &[]).unwrap().is_none());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("ip-route-show").unwrap(), RpcMethod::IpRouteShow);
        assert!(parse_method("rm").is_err());
    }
}
