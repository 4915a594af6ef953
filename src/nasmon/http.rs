// Nasmon - NAS enclosure and disk statistics agent
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::collector::{get_stats_blocking, Stats, StatsCollector};
use crate::metrics::MetricsExposition;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS,
};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::TEXT_FORMAT;
use std::sync::Arc;
use std::time::Duration;

const JSON_FORMAT: &str = "application/json";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Global state shared between all HTTP requests via Arc.
pub struct RequestContext {
    collector: Arc<StatsCollector>,
    exposition: MetricsExposition,
    timeout: Duration,
}

impl RequestContext {
    pub fn new(collector: Arc<StatsCollector>, exposition: MetricsExposition, timeout: Duration) -> Self {
        RequestContext {
            collector,
            exposition,
            timeout,
        }
    }
}

pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = match (&method, path.as_ref()) {
        (&Method::GET, "/v1/nasStats") | (&Method::GET, "/v1/data") => stats_response(&context).await,
        (_, "/v1/nasStats") | (_, "/v1/data") => http_status_no_body(StatusCode::METHOD_NOT_ALLOWED),

        (&Method::GET, "/metrics") => match context.exposition.encoded_text() {
            Ok(buffer) => http_response(StatusCode::OK, TEXT_FORMAT, Body::from(buffer)),
            Err(e) => {
                tracing::error!(message = "error encoding metrics", error = %e);
                http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        (_, "/metrics") => http_status_no_body(StatusCode::METHOD_NOT_ALLOWED),

        _ => http_status_no_body(StatusCode::NOT_FOUND),
    };

    Ok(res)
}

async fn stats_response(context: &RequestContext) -> Response<Body> {
    let res = tokio::time::timeout(context.timeout, get_stats_blocking(context.collector.clone())).await;

    match res {
        Ok(Ok(Stats::Unavailable)) => http_response(StatusCode::SERVICE_UNAVAILABLE, JSON_FORMAT, Body::from("{}")),
        Ok(Ok(stats)) => match stats.snapshot().map(|s| serde_json::to_vec(s.as_ref())) {
            Some(Ok(buffer)) => http_response(StatusCode::OK, JSON_FORMAT, Body::from(buffer)),
            Some(Err(e)) => {
                tracing::error!(message = "unable to serialize stats", error = %e);
                http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
            }
            None => http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR),
        },
        Ok(Err(e)) => {
            tracing::error!(
                message = "unable to collect stats for request",
                kind = e.kind().as_label(),
                cause = e.cause_label(),
                error = %e,
            );
            http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => {
            tracing::warn!(message = "timed out waiting for stats", timeout_secs = context.timeout.as_secs_f64());
            http_status_no_body(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

/// Headers that let browser dashboards on other origins read responses.
fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET,PUT,POST,DELETE"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
}

fn http_response(code: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut res = Response::new(body);
    *res.status_mut() = code;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    add_cors_headers(res.headers_mut());
    res
}

fn http_status_no_body(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    add_cors_headers(res.headers_mut());
    res
}

#[cfg(test)]
mod test {
    use super::{http_route, RequestContext};
    use crate::metrics::MetricsExposition;
    use crate::test::{fake_collector, FakeClimate};
    use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
    use hyper::{Body, Method, Request, Response, StatusCode};
    use prometheus::Registry;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(climate: Option<FakeClimate>, timeout: Duration) -> Arc<RequestContext> {
        Arc::new(RequestContext::new(
            Arc::new(fake_collector(climate)),
            MetricsExposition::new(Registry::new()),
            timeout,
        ))
    }

    async fn request(context: Arc<RequestContext>, method: Method, path: &str) -> Response<Body> {
        let req = Request::builder().method(method).uri(path).body(Body::empty()).unwrap();
        http_route(req, context).await.unwrap()
    }

    async fn body_json(res: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stats_ok() {
        let ctx = context(Some(FakeClimate::new()), Duration::from_secs(5));

        for path in ["/v1/nasStats", "/v1/data"] {
            let res = request(ctx.clone(), Method::GET, path).await;
            assert_eq!(StatusCode::OK, res.status());
            assert_eq!("application/json", res.headers()[CONTENT_TYPE]);
            assert_eq!("*", res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN]);

            let json = body_json(res).await;
            assert_eq!(18.4, json["power"]["watts"].as_f64().unwrap());
            assert_eq!(74.0, json["environment"]["temperature1"].as_f64().unwrap());
            assert_eq!(false, json["filesystems"]["data1"]["activityRead"].as_bool().unwrap());
        }
    }

    #[tokio::test]
    async fn test_stats_unavailable() {
        let ctx = context(None, Duration::from_secs(5));
        let res = request(ctx, Method::GET, "/v1/nasStats").await;

        assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());
        assert!(body_json(res).await.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_error() {
        let climate = FakeClimate::new();
        climate.set_failing(true);
        let ctx = context(Some(climate), Duration::from_secs(5));
        let res = request(ctx, Method::GET, "/v1/nasStats").await;

        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, res.status());
    }

    #[tokio::test]
    async fn test_stats_timeout() {
        let climate = FakeClimate::new().with_delay(Duration::from_millis(500));
        let ctx = context(Some(climate), Duration::from_millis(50));
        let res = request(ctx, Method::GET, "/v1/nasStats").await;

        assert_eq!(StatusCode::GATEWAY_TIMEOUT, res.status());
    }

    #[tokio::test]
    async fn test_metrics() {
        let ctx = context(Some(FakeClimate::new()), Duration::from_secs(5));
        let res = request(ctx, Method::GET, "/metrics").await;

        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(prometheus::TEXT_FORMAT, res.headers()[CONTENT_TYPE]);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let ctx = context(Some(FakeClimate::new()), Duration::from_secs(5));

        let res = request(ctx.clone(), Method::POST, "/v1/nasStats").await;
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());

        let res = request(ctx, Method::DELETE, "/metrics").await;
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
    }

    #[tokio::test]
    async fn test_not_found() {
        let ctx = context(Some(FakeClimate::new()), Duration::from_secs(5));
        let res = request(ctx, Method::GET, "/v1/lightState").await;

        assert_eq!(StatusCode::NOT_FOUND, res.status());
        assert_eq!("*", res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN]);
    }
}
