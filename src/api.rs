use crate::event::Event;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::client::HttpConnector;
use hyper::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use log::{debug, error};
use std::collections::HashMap;
use std::io::Write;
use thiserror::Error;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_HOST: &str = "https://us.i.posthog.com";

/// A logical ingest destination.
///
/// Each kind maps to a fixed suffix that is appended to the normalized
/// host; the suffix owns its query string and trailing slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Event batch ingestion.
    Batch,

    /// Feature flag and remote configuration lookup.
    Decide,

    /// Session replay snapshot upload.
    Snapshot,
}

impl EndpointKind {
    /// The fixed URL suffix for this endpoint.
    pub fn suffix(self) -> &'static str {
        match self {
            EndpointKind::Batch => "/batch",
            EndpointKind::Decide => "/decide?v=3",
            EndpointKind::Snapshot => "/s/",
        }
    }

    fn name(self) -> &'static str {
        match self {
            EndpointKind::Batch => "batch",
            EndpointKind::Decide => "decide",
            EndpointKind::Snapshot => "snapshot",
        }
    }
}

/// An error surfaced by a transport call.
///
/// Each call delivers at most one of these; a failed call has no effect on
/// subsequent calls.
#[derive(Error, Debug, PartialEq)]
pub enum ApiError {
    /// The configured host cannot form a valid endpoint URL. Raised when
    /// the `Api` is built, not per call.
    #[error("invalid host `{host}`: {message}")]
    Config { host: String, message: String },

    /// A network level failure; no response was received from the server.
    #[error("request to the {endpoint} endpoint failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    /// The server responded with a non-success status code.
    #[error("the {endpoint} endpoint responded with status {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// The payload could not be encoded, or the response could not be
    /// decoded.
    #[error("cannot encode or decode payload: {message}")]
    Serialization { message: String },
}

impl ApiError {
    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Compose the canonical URL for an endpoint from the configured host.
//
// At most one trailing slash is stripped from the host, so a sub-path
// (`https://h/a/b`) is preserved and prefixed before the suffix. The
// result must carry a scheme and an authority, otherwise no request
// could ever be issued and the configuration is rejected.
fn compose_endpoint(host: &str, kind: EndpointKind) -> Result<Uri, ApiError> {
    let base = host.strip_suffix('/').unwrap_or(host);

    let url = format!("{}{}", base, kind.suffix());
    let uri = url.parse::<Uri>().map_err(|e| ApiError::Config {
        host: host.to_string(),
        message: e.to_string(),
    })?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ApiError::Config {
            host: host.to_string(),
            message: "missing scheme or authority".to_string(),
        });
    }

    Ok(uri)
}

// The envelope for batch and snapshot uploads.
#[derive(serde::Serialize)]
struct CaptureBody<'a> {
    api_key: &'a str,
    batch: &'a [Event],
}

// The envelope for decide lookups.
#[derive(serde::Serialize)]
struct DecideBody<'a> {
    api_key: &'a str,
    distinct_id: &'a str,

    #[serde(rename = "$anon_distinct_id")]
    anon_distinct_id: &'a str,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    groups: &'a HashMap<String, String>,
}

/// The decoded payload of a decide call.
///
/// Unknown fields are ignored and missing fields are defaulted, so the
/// server can extend the response without breaking older clients.
#[derive(serde::Deserialize, Debug, Default, PartialEq)]
pub struct DecideResponse {
    /// Feature flags evaluated for the given identity, keyed by flag key.
    #[serde(default, rename = "featureFlags")]
    pub feature_flags: HashMap<String, serde_json::Value>,

    /// JSON payloads attached to matched flags, keyed by flag key.
    #[serde(default, rename = "featureFlagPayloads")]
    pub feature_flag_payloads: HashMap<String, String>,

    /// Set when the server could not evaluate all flags.
    #[serde(default, rename = "errorsWhileComputingFlags")]
    pub errors_while_computing_flags: bool,
}

/// `ApiBuilder` acts as builder for initializing an `Api`.
///
/// It can be used to customize the ingest host and the product info.
///
/// ```
/// # use posthog_transport::ApiBuilder;
/// # fn main() -> Result<(), posthog_transport::ApiError> {
/// # let api_key = "";
/// let api = ApiBuilder::new(api_key)
///     .host("https://eu.i.posthog.com")
///     .product_info("RustDoc", "1.0")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ApiBuilder {
    api_key: String,
    host: String,
    product_info: Option<(String, String)>,
}

impl ApiBuilder {
    /// Initialize the builder with a project API key.
    ///
    /// Other values will be set to defaults:
    ///  * The default host is `https://us.i.posthog.com`.
    ///  * By default, product information is empty.
    ///
    /// ```
    /// # use posthog_transport::ApiBuilder;
    /// # let api_key = "";
    /// let mut builder = ApiBuilder::new(api_key);
    /// ```
    pub fn new(api_key: &str) -> Self {
        ApiBuilder {
            api_key: api_key.to_string(),
            host: DEFAULT_HOST.to_string(),
            product_info: None,
        }
    }

    /// Configure the ingest host.
    ///
    /// The host is a base URL and may carry a sub-path and a trailing
    /// slash; endpoint suffixes are appended to its normalized form. Both
    /// `https` and `http` schemes are accepted, the latter mainly for
    /// local servers.
    ///
    /// ```
    /// # use posthog_transport::ApiBuilder;
    /// # let api_key = "";
    /// let mut builder = ApiBuilder::new(api_key).host("https://eu.i.posthog.com");
    /// ```
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Configure a product and version.
    ///
    /// The specified product and version will be appended to the
    /// `User-Agent` header of requests.
    ///
    /// ```
    /// # use posthog_transport::ApiBuilder;
    /// # let api_key = "";
    /// let mut builder = ApiBuilder::new(api_key).product_info("my-app", "0.2.1");
    /// ```
    pub fn product_info(mut self, product: &str, version: &str) -> Self {
        self.product_info = Some((product.to_string(), version.to_string()));
        self
    }

    /// Build an `Api`.
    ///
    /// All endpoint URLs are composed and validated here, so a malformed
    /// host fails the construction rather than every later call.
    ///
    /// ```
    /// # use posthog_transport::ApiBuilder;
    /// # fn main() -> Result<(), posthog_transport::ApiError> {
    /// # let api_key = "";
    /// let api = ApiBuilder::new(api_key).build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn build(self) -> Result<Api, ApiError> {
        Api::new(self)
    }

    /// Build a blocking, callback driven `Api`.
    #[cfg(feature = "blocking")]
    pub fn build_blocking(self) -> anyhow::Result<blocking::Api> {
        blocking::Api::new(self)
    }

    fn get_user_agent_header(&self) -> String {
        let product_info = match &self.product_info {
            Some(s) => format!(" {}/{}", s.0, s.1),
            _ => "".to_string(),
        };

        format!("PostHog-Rust-Transport/{}{}", VERSION, product_info)
    }
}

/// The API transport.
///
/// Translates a logical call into exactly one outbound HTTP request and
/// delivers exactly one outcome per call. It holds no mutable state, so
/// one instance is safely shared across concurrent calls. Queueing,
/// retries and backoff are a caller concern.
pub struct Api {
    api_key: String,
    user_agent: String,
    batch_endpoint: Uri,
    decide_endpoint: Uri,
    snapshot_endpoint: Uri,
    client: hyper::Client<HttpsConnector<HttpConnector>>,
}

impl Api {
    /// Constructs an `Api` from an `ApiBuilder`.
    pub fn new(builder: ApiBuilder) -> Result<Self, ApiError> {
        let https = HttpsConnector::new();
        let user_agent = builder.get_user_agent_header();

        Ok(Api {
            api_key: builder.api_key,
            user_agent,
            batch_endpoint: compose_endpoint(&builder.host, EndpointKind::Batch)?,
            decide_endpoint: compose_endpoint(&builder.host, EndpointKind::Decide)?,
            snapshot_endpoint: compose_endpoint(&builder.host, EndpointKind::Snapshot)?,
            client: hyper::Client::builder().build::<_, hyper::Body>(https),
        })
    }

    /// The canonical URL a given endpoint kind resolves to.
    pub fn endpoint_url(&self, kind: EndpointKind) -> &Uri {
        match kind {
            EndpointKind::Batch => &self.batch_endpoint,
            EndpointKind::Decide => &self.decide_endpoint,
            EndpointKind::Snapshot => &self.snapshot_endpoint,
        }
    }

    /// Sends a batch of events to the batch endpoint.
    ///
    /// Issues exactly one POST request; the result reports whether the
    /// server accepted the batch. Ownership of the events stays with the
    /// caller, so a failed batch can be requeued.
    pub async fn batch(&self, events: &[Event]) -> Result<(), ApiError> {
        debug!("sending {} events to {}", events.len(), self.batch_endpoint);

        let json = Self::marshall(&CaptureBody {
            api_key: &self.api_key,
            batch: events,
        })?;

        let request = self.compressed_request(&self.batch_endpoint, &json)?;
        self.dispatch(EndpointKind::Batch, request).await?;

        Ok(())
    }

    /// Evaluates feature flags for an identity on the decide endpoint.
    ///
    /// Issues exactly one POST request and decodes the response body on
    /// success.
    pub async fn decide(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Result<DecideResponse, ApiError> {
        debug!("requesting flags from {}", self.decide_endpoint);

        let json = Self::marshall(&DecideBody {
            api_key: &self.api_key,
            distinct_id,
            anon_distinct_id: anonymous_id,
            groups,
        })?;

        let request = self.plain_request(&self.decide_endpoint, json)?;
        let response = self.dispatch(EndpointKind::Decide, request).await?;

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ApiError::Transport {
                endpoint: EndpointKind::Decide.name(),
                message: e.to_string(),
            })?;

        serde_json::from_slice(&body).map_err(|e| ApiError::Serialization {
            message: e.to_string(),
        })
    }

    /// Sends a batch of session replay events to the snapshot endpoint.
    pub async fn snapshot(&self, events: &[Event]) -> Result<(), ApiError> {
        debug!(
            "sending {} replay events to {}",
            events.len(),
            self.snapshot_endpoint
        );

        let json = Self::marshall(&CaptureBody {
            api_key: &self.api_key,
            batch: events,
        })?;

        let request = self.compressed_request(&self.snapshot_endpoint, &json)?;
        self.dispatch(EndpointKind::Snapshot, request).await?;

        Ok(())
    }

    fn marshall<T: serde::Serialize>(payload: &T) -> Result<String, ApiError> {
        serde_json::to_string(payload).map_err(|e| ApiError::Serialization {
            message: e.to_string(),
        })
    }

    // Returns a gzip compressed version of the given string.
    #[allow(clippy::wrong_self_convention)]
    fn to_gzip(text: &str) -> Result<Vec<u8>, ApiError> {
        let to_serialization = |e: std::io::Error| ApiError::Serialization {
            message: e.to_string(),
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(text.as_bytes())
            .map_err(to_serialization)?;
        encoder.finish().map_err(to_serialization)
    }

    // Create a gzip compressed JSON POST request.
    fn compressed_request(&self, endpoint: &Uri, json: &str) -> Result<Request<Body>, ApiError> {
        let gzipped = Self::to_gzip(json)?;

        Request::builder()
            .method(Method::POST)
            .uri(endpoint)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::from(gzipped))
            .map_err(|e| ApiError::Serialization {
                message: e.to_string(),
            })
    }

    // Create an uncompressed JSON POST request.
    fn plain_request(&self, endpoint: &Uri, json: String) -> Result<Request<Body>, ApiError> {
        Request::builder()
            .method(Method::POST)
            .uri(endpoint)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .map_err(|e| ApiError::Serialization {
                message: e.to_string(),
            })
    }

    // Issue the request and map the response status to an outcome.
    async fn dispatch(
        &self,
        kind: EndpointKind,
        request: Request<Body>,
    ) -> Result<Response<Body>, ApiError> {
        let response =
            self.client
                .request(request)
                .await
                .map_err(|e| ApiError::Transport {
                    endpoint: kind.name(),
                    message: e.to_string(),
                })?;

        Self::check_status(kind, response.status())?;

        Ok(response)
    }

    fn check_status(kind: EndpointKind, status: StatusCode) -> Result<(), ApiError> {
        if status.is_success() {
            debug!("response {}, {} call accepted", status, kind.name());
            Ok(())
        } else {
            error!("response {}, {} call rejected", status, kind.name());
            Err(ApiError::Status {
                endpoint: kind.name(),
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(feature = "blocking")]
pub mod blocking {
    use super::{Api as AsyncApi, ApiBuilder, ApiError, DecideResponse};
    use crate::event::Event;
    use anyhow::Result;
    use futures::future;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;
    use tokio::runtime::Builder;

    type CaptureCallback = Box<dyn FnOnce(Result<(), ApiError>) + Send>;
    type DecideCallback = Box<dyn FnOnce(Result<DecideResponse, ApiError>) + Send>;

    // One call in flight between the caller and the dispatcher thread,
    // carrying its payload and its completion callback.
    enum Dispatch {
        Batch(Vec<Event>, CaptureCallback),
        Decide {
            distinct_id: String,
            anonymous_id: String,
            groups: HashMap<String, String>,
            callback: DecideCallback,
        },
        Snapshot(Vec<Event>, CaptureCallback),
    }

    impl Dispatch {
        // Complete a call that never reached the dispatcher. The callback
        // contract holds even after shutdown.
        fn reject(self) {
            let error = |endpoint| ApiError::Transport {
                endpoint,
                message: "dispatcher is shut down".to_string(),
            };

            match self {
                Dispatch::Batch(_, callback) => callback(Err(error("batch"))),
                Dispatch::Decide { callback, .. } => callback(Err(error("decide"))),
                Dispatch::Snapshot(_, callback) => callback(Err(error("snapshot"))),
            }
        }
    }

    async fn run(api: &AsyncApi, call: Dispatch) {
        match call {
            Dispatch::Batch(events, callback) => callback(api.batch(&events).await),
            Dispatch::Decide {
                distinct_id,
                anonymous_id,
                groups,
                callback,
            } => callback(api.decide(&distinct_id, &anonymous_id, &groups).await),
            Dispatch::Snapshot(events, callback) => callback(api.snapshot(&events).await),
        }
    }

    /// A callback driven variant of the transport.
    ///
    /// Calls return immediately; a dispatcher thread owns the runtime and
    /// invokes each call's callback exactly once, on completion or
    /// failure. The callback runs on the dispatcher thread, not on the
    /// calling thread.
    pub struct Api {
        channel: Mutex<mpsc::Sender<Dispatch>>,
        handle: thread::JoinHandle<()>,
    }

    impl Api {
        pub fn new(builder: ApiBuilder) -> Result<Self> {
            let (tx, rx) = mpsc::channel::<Dispatch>();
            let mut runtime = Builder::new().threaded_scheduler().enable_all().build()?;
            let api = builder.build()?;

            let handle = thread::spawn(move || loop {
                let mut calls = vec![];

                // Wait until at least one call is received.
                match rx.recv() {
                    Ok(c) => calls.push(c),
                    Err(_) => break,
                };

                // Empty the channel.
                while let Ok(c) = rx.try_recv() {
                    calls.push(c)
                }

                // Block until all pending calls completed.
                runtime.block_on(future::join_all(calls.drain(..).map(|c| run(&api, c))));
            });

            Ok(Api {
                channel: Mutex::new(tx),
                handle,
            })
        }

        /// Sends a batch of events to the batch endpoint.
        pub fn batch<F>(&self, events: Vec<Event>, callback: F)
        where
            F: FnOnce(Result<(), ApiError>) + Send + 'static,
        {
            self.submit(Dispatch::Batch(events, Box::new(callback)));
        }

        /// Evaluates feature flags for an identity on the decide endpoint.
        pub fn decide<F>(
            &self,
            distinct_id: &str,
            anonymous_id: &str,
            groups: HashMap<String, String>,
            callback: F,
        ) where
            F: FnOnce(Result<DecideResponse, ApiError>) + Send + 'static,
        {
            self.submit(Dispatch::Decide {
                distinct_id: distinct_id.to_string(),
                anonymous_id: anonymous_id.to_string(),
                groups,
                callback: Box::new(callback),
            });
        }

        /// Sends a batch of session replay events to the snapshot endpoint.
        pub fn snapshot<F>(&self, events: Vec<Event>, callback: F)
        where
            F: FnOnce(Result<(), ApiError>) + Send + 'static,
        {
            self.submit(Dispatch::Snapshot(events, Box::new(callback)));
        }

        fn submit(&self, call: Dispatch) {
            let channel = match self.channel.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            if let Err(mpsc::SendError(call)) = channel.send(call) {
                drop(channel);
                call.reject();
            }
        }

        /// Completes all pending calls and stops the dispatcher thread.
        pub fn shutdown(self) {
            drop(self.channel);

            let _ = self.handle.join();
        }
    }
}
