//! Parameter parsing stages
//!
//! The three outermost stages of the pipeline fill in the request's parameter
//! maps before anything else runs:
//!
//! - [`ParamsLayer`] parses the query string and urlencoded bodies,
//! - [`NestedParamsLayer`] expands bracketed keys such as `pizza[size]`,
//! - [`KeywordParamsLayer`] normalizes keys written in keyword style (`:x`).
//!
//! Repeated keys collect into arrays. Parsing never fails the request.

use super::layer::{BoxedNext, MiddlewareLayer};
use crate::format::{group_pairs, MediaType, FORM};
use crate::handler::{BoxFuture, HandlerResult};
use crate::request::Request;
use serde_json::{Map, Value};

fn parse_urlencoded(input: &[u8]) -> Map<String, Value> {
    match serde_urlencoded::from_bytes::<Vec<(String, String)>>(input) {
        Ok(pairs) => group_pairs(pairs),
        Err(_e) => {
            trace_debug!(error = %_e, "ignoring malformed urlencoded parameters");
            Map::new()
        }
    }
}

/// Parses query and form parameters into the request
///
/// `params` receives the query parameters, overridden by form parameters.
#[derive(Clone, Default)]
pub struct ParamsLayer;

impl ParamsLayer {
    fn parse(req: &mut Request) {
        let query = parse_urlencoded(req.query_string().unwrap_or_default().as_bytes());

        let is_form = req
            .content_type()
            .map(|ct| MediaType::parse(ct).essence == FORM)
            .unwrap_or(false);
        let form = match req.body() {
            Some(body) if is_form => parse_urlencoded(body),
            _ => Map::new(),
        };

        let params = req.params_mut();
        params.extend(query.clone());
        params.extend(form.clone());
        req.set_query_params(query);
        req.set_form_params(form);
    }
}

impl MiddlewareLayer for ParamsLayer {
    fn name(&self) -> &'static str {
        "params"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        Self::parse(&mut req);
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Split `a[b][c]` into `["a", "b", "c"]`; `a[]` yields `["a", ""]`
fn key_path(key: &str) -> Vec<&str> {
    match key.find('[') {
        Some(open) if open > 0 && key.ends_with(']') => {
            let mut path = vec![&key[..open]];
            path.extend(key[open + 1..key.len() - 1].split("]["));
            path
        }
        _ => vec![key],
    }
}

fn assoc_nested(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };

    match rest {
        [] => {
            target.insert(head.to_string(), value);
        }
        [""] => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(vec![slot.take()]);
            }
            if let Value::Array(items) = slot {
                match value {
                    Value::Array(values) => items.extend(values),
                    value => items.push(value),
                }
            }
        }
        _ => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                assoc_nested(child, rest, value);
            }
        }
    }
}

/// Expand bracketed keys into nested maps and arrays
pub fn nest_params(params: Map<String, Value>) -> Map<String, Value> {
    let mut nested = Map::new();
    for (key, value) in params {
        assoc_nested(&mut nested, &key_path(&key), value);
    }
    nested
}

/// Expands bracketed parameter keys
#[derive(Clone, Default)]
pub struct NestedParamsLayer;

impl MiddlewareLayer for NestedParamsLayer {
    fn name(&self) -> &'static str {
        "nested-params"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let params = std::mem::take(req.params_mut());
        *req.params_mut() = nest_params(params);
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Strip the keyword marker from keys, recursively
pub fn keywordize(params: Map<String, Value>) -> Map<String, Value> {
    params
        .into_iter()
        .map(|(key, value)| {
            let key = key.strip_prefix(':').map(str::to_string).unwrap_or(key);
            let value = match value {
                Value::Object(map) => Value::Object(keywordize(map)),
                other => other,
            };
            (key, value)
        })
        .collect()
}

/// Normalizes keyword-style parameter keys
#[derive(Clone, Default)]
pub struct KeywordParamsLayer;

impl MiddlewareLayer for KeywordParamsLayer {
    fn name(&self) -> &'static str {
        "keyword-params"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let params = std::mem::take(req.params_mut());
        *req.params_mut() = keywordize(params);
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::middleware::compose;
    use crate::middleware::MiddlewareSpec;
    use crate::response::Response;
    use bytes::Bytes;
    use http::header;
    use serde_json::json;
    use std::sync::Arc;

    fn echo_params() -> BoxedNext {
        Arc::new(|req: Request| {
            let body = json!({
                "query": req.query_params(),
                "form": req.form_params(),
                "params": req.params(),
            });
            Box::pin(async move { Ok::<_, ApiError>(Response::ok(body)) }) as BoxFuture<HandlerResult>
        })
    }

    async fn run(req: http::Request<Bytes>) -> Value {
        let stack = compose([
            Some(MiddlewareSpec::layer(ParamsLayer)),
            Some(MiddlewareSpec::layer(NestedParamsLayer)),
            Some(MiddlewareSpec::layer(KeywordParamsLayer)),
        ]);
        let response = stack.apply(echo_params())(req.into()).await.unwrap();
        response.body().as_value().cloned().unwrap()
    }

    #[tokio::test]
    async fn query_params_with_repeated_keys() {
        let req = http::Request::builder()
            .uri("/sum?x=1&y=2&tag=a&tag=b")
            .body(Bytes::new())
            .unwrap();
        let body = run(req).await;
        assert_eq!(body["query"], json!({"x": "1", "y": "2", "tag": ["a", "b"]}));
        assert_eq!(body["params"]["x"], "1");
    }

    #[tokio::test]
    async fn form_params_override_query() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/sum?x=1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(b"x=5&y=2"))
            .unwrap();
        let body = run(req).await;
        assert_eq!(body["form"], json!({"x": "5", "y": "2"}));
        assert_eq!(body["params"], json!({"x": "5", "y": "2"}));
    }

    #[tokio::test]
    async fn json_bodies_are_not_form_parsed() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/sum")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"x=5"))
            .unwrap();
        assert_eq!(run(req).await["form"], json!({}));
    }

    #[tokio::test]
    async fn nested_and_keyword_keys() {
        let req = http::Request::builder()
            .uri("/?pizza%5Bsize%5D=L&pizza%5Btoppings%5D%5B%5D=ham&pizza%5Btoppings%5D%5B%5D=olive&:limit=2")
            .body(Bytes::new())
            .unwrap();
        let body = run(req).await;
        assert_eq!(
            body["params"],
            json!({
                "pizza": {"size": "L", "toppings": ["ham", "olive"]},
                "limit": "2"
            })
        );
    }

    #[test]
    fn key_paths() {
        assert_eq!(key_path("a"), vec!["a"]);
        assert_eq!(key_path("a[b][c]"), vec!["a", "b", "c"]);
        assert_eq!(key_path("a[]"), vec!["a", ""]);
        assert_eq!(key_path("[x]"), vec!["[x]"]);
        assert_eq!(key_path("a[b"), vec!["a[b"]);
    }
}
