//! HTTP face of the WHEP signaling service.

use super::http::{Request, Response};
use super::paths::{trailing_segment, urls_match};
use crate::errors::SignalingError;
use crate::signaling::{SignalingService, SDP_CONTENT_TYPE, TRICKLE_CONTENT_TYPE};
use crate::webrtc::IceServer;
use http::header::{self, HeaderName};
use http::StatusCode;
use std::sync::Arc;

const ALLOW_METHODS: &str = "OPTIONS, GET, POST, PATCH, DELETE";
const ALLOW_HEADERS: &str = "Authorization, Content-Type, If-Match";
const POST_EXPOSED_HEADERS: &str = "ETag, ID, Accept-Patch, Link, Location";
const SESSION_ID: &str = "id";
const ACCEPT_PATCH: &str = "accept-patch";

/// Base path of the `Location` handed out for trickle ICE.
pub const SESSION_PREFIX: &str = "/whep";

/// OPTIONS, POST and PATCH handlers for the signaling endpoints.
#[derive(Clone)]
pub struct WhepRoutes {
    base: String,
    ice_servers: Vec<IceServer>,
    service: Arc<dyn SignalingService>,
}

impl WhepRoutes {
    pub fn new(base: impl Into<String>, ice_servers: Vec<IceServer>, service: Arc<dyn SignalingService>) -> Self {
        Self {
            base: base.into(),
            ice_servers,
            service,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Paths handled by [`WhepRoutes::patch`].
    pub fn handles_patch(&self, path: &str) -> bool {
        urls_match(&self.base, path, false) || urls_match(SESSION_PREFIX, path, false)
    }

    pub fn options(&self, request: &Request) -> Response {
        let mut response = with_cors(Response::new(StatusCode::NO_CONTENT))
            .with_header(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS)
            .with_header(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS);

        let preflight = request
            .headers
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
        let endpoint = urls_match(&format!("{}/whip", self.base), &request.target, true)
            || urls_match(&format!("{}/whep", self.base), &request.target, true);
        if !preflight && endpoint {
            response = response.with_header(header::ACCESS_CONTROL_EXPOSE_HEADERS, "Link");
            response = self.with_links(response);
        }
        response
    }

    pub fn post(&self, request: &Request) -> Response {
        let offer = match request.body_text() {
            Ok(offer) => offer,
            Err(e) => return error_response(&SignalingError::BadRequest(e.to_string())),
        };

        match self.service.offer(request.content_type(), offer) {
            Ok(answer) => {
                let response = with_cors(Response::new(StatusCode::CREATED))
                    .with_body(SDP_CONTENT_TYPE, answer.sdp)
                    .with_header(header::ETAG, "*")
                    .with_header(HeaderName::from_static(SESSION_ID), answer.id.to_string())
                    .with_header(header::ACCESS_CONTROL_EXPOSE_HEADERS, POST_EXPOSED_HEADERS)
                    .with_header(HeaderName::from_static(ACCEPT_PATCH), TRICKLE_CONTENT_TYPE)
                    .with_header(header::LOCATION, answer.location);
                self.with_links(response)
            }
            Err(e) => {
                log::warn!("offer rejected: {}", e);
                error_response(&e)
            }
        }
    }

    pub fn patch(&self, request: &Request) -> Response {
        let Some(session) = self.session_in(&request.target) else {
            return error_response(&SignalingError::BadRequest(format!(
                "no session id in {}",
                request.target
            )));
        };
        let fragment = match request.body_text() {
            Ok(fragment) => fragment,
            Err(e) => return error_response(&SignalingError::BadRequest(e.to_string())),
        };

        match self.service.trickle(session, request.content_type(), fragment) {
            Ok(_) => with_cors(Response::new(StatusCode::NO_CONTENT)),
            Err(e) => {
                log::debug!("trickle for {} rejected: {}", session, e);
                error_response(&e)
            }
        }
    }

    /// Session id from `{base}/whep/{id}`, `{base}/whip/{id}` or `/whep/{id}`.
    fn session_in<'a>(&self, target: &'a str) -> Option<&'a str> {
        [
            format!("{}/whep", self.base),
            format!("{}/whip", self.base),
            SESSION_PREFIX.to_string(),
        ]
        .iter()
        .find_map(|prefix| trailing_segment(prefix, target))
    }

    fn with_links(&self, mut response: Response) -> Response {
        for link in link_values(&self.ice_servers) {
            response = response.with_header(header::LINK, link);
        }
        response
    }
}

/// `Link` header values advertising `servers`, one per URL.
pub fn link_values(servers: &[IceServer]) -> Vec<String> {
    let mut links = Vec::new();
    for server in servers {
        for url in &server.urls {
            let mut link = format!("<{}>; rel=\"ice-server\"", url);
            if let (Some(username), Some(credential)) = (&server.username, &server.credential) {
                link.push_str(&format!(
                    "; username=\"{}\"; credential=\"{}\"; credential-type=\"password\"",
                    username, credential
                ));
            }
            links.push(link);
        }
    }
    links
}

pub fn status_for(error: &SignalingError) -> StatusCode {
    match error {
        SignalingError::UnsupportedMediaType { .. } | SignalingError::BadRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        SignalingError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SignalingError::TooManySessions(_) => StatusCode::TOO_MANY_REQUESTS,
        SignalingError::Transport(_) | SignalingError::Scheduler(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error response for a signaling route, CORS headers included.
pub fn error_response(error: &SignalingError) -> Response {
    let status = status_for(error);
    let message = match error {
        SignalingError::TooManySessions(_) => "Too many clients connected".to_string(),
        other => other.to_string(),
    };
    with_cors(Response::text(status, message))
}

pub fn with_cors(response: Response) -> Response {
    response
        .with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .with_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "false")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method, Version};
    use crate::signaling::WhepAnswer;
    use crate::types::SessionId;
    use std::sync::Mutex;

    /// Records calls and answers from a canned script.
    #[derive(Default)]
    struct FakeService {
        offers: Mutex<Vec<(String, String)>>,
        trickles: Mutex<Vec<(String, String, String)>>,
        offer_error: Option<SignalingError>,
        trickle_error: Option<SignalingError>,
    }

    impl SignalingService for FakeService {
        fn offer(&self, content_type: &str, sdp: String) -> Result<WhepAnswer, SignalingError> {
            self.offers
                .lock()
                .unwrap()
                .push((content_type.to_string(), sdp));
            if let Some(error) = &self.offer_error {
                return Err(error.clone());
            }
            let id = SessionId::new();
            Ok(WhepAnswer {
                id,
                sdp: "v=0\r\n".to_string(),
                location: format!("/whep/{}", id),
            })
        }

        fn trickle(
            &self,
            session: &str,
            content_type: &str,
            fragment: String,
        ) -> Result<usize, SignalingError> {
            self.trickles.lock().unwrap().push((
                session.to_string(),
                content_type.to_string(),
                fragment,
            ));
            match &self.trickle_error {
                Some(error) => Err(error.clone()),
                None => Ok(1),
            }
        }
    }

    fn request(method: Method, target: &str, headers: &[(&str, &str)], body: &str) -> Request {
        Request {
            method,
            target: target.to_string(),
            version: Version::HTTP_11,
            headers: headers
                .iter()
                .map(|(k, v)| {
                    (
                        HeaderName::from_bytes(k.as_bytes()).unwrap(),
                        HeaderValue::from_str(v).unwrap(),
                    )
                })
                .collect::<HeaderMap>(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn routes(service: FakeService, ice_servers: Vec<IceServer>) -> (WhepRoutes, Arc<FakeService>) {
        let service = Arc::new(service);
        (
            WhepRoutes::new("/webrtc", ice_servers, service.clone()),
            service,
        )
    }

    #[test]
    fn test_preflight_has_cors_without_links() {
        let (routes, _) = routes(FakeService::default(), vec![IceServer::new("stun:a")]);
        let response = routes.options(&request(
            Method::OPTIONS,
            "/webrtc/whep",
            &[("Access-Control-Request-Method", "POST")],
            "",
        ));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(response.header("Access-Control-Allow-Methods"), Some(ALLOW_METHODS));
        assert!(response.header("Link").is_none());
    }

    #[test]
    fn test_plain_options_on_endpoint_advertises_links() {
        let (routes, _) = routes(
            FakeService::default(),
            vec![IceServer::new("turn:t").with_credentials("user", "pass")],
        );
        let response = routes.options(&request(Method::OPTIONS, "/webrtc/whep", &[], ""));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.header("Access-Control-Expose-Headers"), Some("Link"));
        assert_eq!(
            response.header("Link"),
            Some("<turn:t>; rel=\"ice-server\"; username=\"user\"; credential=\"pass\"; credential-type=\"password\"")
        );
    }

    #[test]
    fn test_plain_options_elsewhere_still_has_cors() {
        let (routes, _) = routes(FakeService::default(), Vec::new());
        let response = routes.options(&request(Method::OPTIONS, "/webrtc", &[], ""));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.header("Access-Control-Allow-Credentials"), Some("false"));
        assert!(response.header("Access-Control-Expose-Headers").is_none());
    }

    #[test]
    fn test_post_answer_headers() {
        let (routes, service) = routes(FakeService::default(), Vec::new());
        let response = routes.post(&request(
            Method::POST,
            "/webrtc/whep",
            &[("Content-Type", SDP_CONTENT_TYPE)],
            "v=0\r\n",
        ));
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.header("Content-Type"), Some(SDP_CONTENT_TYPE));
        assert_eq!(response.header("ETag"), Some("*"));
        assert_eq!(response.header("Accept-Patch"), Some(TRICKLE_CONTENT_TYPE));
        let id = response.header("ID").unwrap();
        assert_eq!(response.header("Location"), Some(format!("/whep/{}", id).as_str()));
        assert!(response.header("Link").is_none());
        assert_eq!(service.offers.lock().unwrap()[0].0, SDP_CONTENT_TYPE);
    }

    #[test]
    fn test_post_over_capacity_is_429() {
        let (routes, _) = routes(
            FakeService {
                offer_error: Some(SignalingError::TooManySessions(1)),
                ..Default::default()
            },
            Vec::new(),
        );
        let response = routes.post(&request(Method::POST, "/webrtc", &[], "v=0"));
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(&response.body[..], b"Too many clients connected");
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn test_patch_routes_session_from_either_prefix() {
        let (routes, service) = routes(FakeService::default(), Vec::new());
        let headers = [("Content-Type", TRICKLE_CONTENT_TYPE)];
        assert!(routes.handles_patch("/whep/abc"));
        assert_eq!(
            routes.patch(&request(Method::PATCH, "/whep/abc", &headers, "a=x")).status,
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            routes.patch(&request(Method::PATCH, "/webrtc/whep/def", &headers, "a=y")).status,
            StatusCode::NO_CONTENT
        );
        let trickles = service.trickles.lock().unwrap();
        assert_eq!(trickles[0].0, "abc");
        assert_eq!(trickles[1].0, "def");
    }

    #[test]
    fn test_patch_without_session_is_400() {
        let (routes, service) = routes(FakeService::default(), Vec::new());
        let headers = [("Content-Type", TRICKLE_CONTENT_TYPE)];
        for target in ["/webrtc", "/webrtc/whep", "/webrtc/whip/", "/whep", "/webrtc/other/abc"] {
            let response = routes.patch(&request(Method::PATCH, target, &headers, "a=x"));
            assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", target);
            assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
        }
        assert!(service.trickles.lock().unwrap().is_empty());
    }

    #[test]
    fn test_patch_takes_id_after_whip_path() {
        let (routes, service) = routes(FakeService::default(), Vec::new());
        let headers = [("Content-Type", TRICKLE_CONTENT_TYPE)];
        let response = routes.patch(&request(Method::PATCH, "/webrtc/whip/ghi?x=1", &headers, "a=z"));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(service.trickles.lock().unwrap()[0].0, "ghi");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&SignalingError::SessionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SignalingError::UnsupportedMediaType {
                expected: "a".into(),
                actual: "b".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SignalingError::Scheduler("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_link_values_one_per_url() {
        let server = IceServer {
            urls: vec!["stun:a".into(), "stun:b".into()],
            username: None,
            credential: None,
        };
        assert_eq!(
            link_values(&[server]),
            vec![
                "<stun:a>; rel=\"ice-server\"".to_string(),
                "<stun:b>; rel=\"ice-server\"".to_string()
            ]
        );
    }
}
