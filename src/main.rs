use graphql_stitcher::federation_gateway::error_response;
use graphql_stitcher::{
    FederationGateway, GraphQLRequest, HttpQueryExecutor, InMemorySchemaRegistry,
};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, LOCATION,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "graphql-stitcher", about = "Stitches remote GraphQL schemas behind one endpoint")]
struct Args {
    /// Gateway config listing the sources to stitch
    #[arg(short, long, default_value = "./gateway.yaml")]
    config: PathBuf,

    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,
}

fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - graphql-stitcher</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

fn json_response(status: StatusCode, body: &Value) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(body.to_string()))
        .unwrap_or_else(|_| internal_server_error())
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read request body");
                    return Ok(Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(full("Failed to read request body"))
                        .unwrap_or_else(|_| internal_server_error()));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(graphql_req) => match gateway.process_request(graphql_req).await {
                    Ok(response) => json_response(StatusCode::OK, &response),
                    Err(e) => {
                        tracing::debug!(error = %e, "request failed");
                        json_response(StatusCode::OK, &error_response(&e))
                    }
                },
                Err(e) => Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
                    .body(full(format!("Invalid JSON request: {}", e)))
                    .unwrap_or_else(|_| internal_server_error()),
            }
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "/graphiql")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(result)
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut gateway = FederationGateway::new(
        Box::new(InMemorySchemaRegistry::new()),
        Arc::new(HttpQueryExecutor::new()),
    );
    if let Err(e) = gateway.load_sources(&args.config).await {
        tracing::error!(error = %e, "failed to provision sources");
        return Err(e.into());
    }
    let gateway = Arc::new(gateway);

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!("graphql-stitcher listening on http://{}", args.listen);
    tracing::info!("GraphiQL UI available at http://{}/graphiql", args.listen);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(peer = %peer, error = %e, "error serving connection");
            }
        });
    }
}
