use crate::error::{BridgeError, Result};
use crate::gemini::{GenerateRequest, Transport};
use futures::future::select_ok;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered endpoint list with a sticky preference for the last one that worked.
#[derive(Debug)]
pub struct EndpointFailover {
    endpoints: Vec<String>,
    preferred: AtomicUsize,
}

/// A successful reply and the endpoint that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub endpoint: String,
}

impl EndpointFailover {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn preferred(&self) -> Option<&str> {
        self.endpoints
            .get(self.preferred.load(Ordering::Acquire))
            .map(String::as_str)
    }

    /// Preferred index first, then the rest in list order.
    fn attempt_order(&self) -> Vec<usize> {
        let preferred = self.preferred.load(Ordering::Acquire);
        let mut order = Vec::with_capacity(self.endpoints.len());
        if preferred < self.endpoints.len() {
            order.push(preferred);
        }
        order.extend((0..self.endpoints.len()).filter(|&i| i != preferred));
        order
    }

    pub async fn generate(
        &self,
        transport: &dyn Transport,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<Reply> {
        let mut last_error = BridgeError::NoEndpoints;
        for index in self.attempt_order() {
            let endpoint = &self.endpoints[index];
            let outcome = transport
                .generate(endpoint, key, request)
                .await
                .and_then(|text| {
                    if text.trim().is_empty() {
                        Err(BridgeError::EmptyReply {
                            endpoint: endpoint.clone(),
                        })
                    } else {
                        Ok(text)
                    }
                });
            match outcome {
                Ok(text) => {
                    if self.preferred.swap(index, Ordering::AcqRel) != index {
                        log::info!("Preferred endpoint is now {endpoint}");
                    }
                    return Ok(Reply {
                        text,
                        endpoint: endpoint.clone(),
                    });
                }
                Err(e) if e.is_failover_eligible() => {
                    log::warn!("Endpoint {endpoint} failed, trying next: {e}");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// True when any endpoint accepts `key`. Never touches the preference.
    pub async fn probe_any(&self, transport: &dyn Transport, key: &str) -> bool {
        if self.endpoints.is_empty() {
            return false;
        }
        let probes = self
            .endpoints
            .iter()
            .map(|endpoint| transport.probe(endpoint, key));
        match select_ok(probes).await {
            Ok(_) => true,
            Err(e) => {
                log::info!("Credential probe rejected on every endpoint: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fails for endpoints listed in `failing`, answers with the endpoint name otherwise.
    #[derive(Default)]
    struct ScriptedTransport {
        failing: HashMap<String, fn(&str) -> BridgeError>,
        blank: Vec<String>, // Answer 200 with whitespace only.
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn blank(mut self, endpoint: &str) -> Self {
            self.blank.push(endpoint.to_string());
            self
        }

        fn failing(mut self, endpoint: &str, err: fn(&str) -> BridgeError) -> Self {
            self.failing.insert(endpoint.to_string(), err);
            self
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().expect("lock").clone()
        }
    }

    fn status_503(endpoint: &str) -> BridgeError {
        BridgeError::Status {
            endpoint: endpoint.to_string(),
            status: 503,
        }
    }

    fn empty(endpoint: &str) -> BridgeError {
        BridgeError::EmptyReply {
            endpoint: endpoint.to_string(),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn generate(
            &self,
            endpoint: &str,
            _key: &str,
            _request: &GenerateRequest,
        ) -> Result<String> {
            self.attempts.lock().expect("lock").push(endpoint.to_string());
            if self.blank.iter().any(|b| b == endpoint) {
                return Ok("  \n".to_string());
            }
            match self.failing.get(endpoint) {
                Some(err) => Err(err(endpoint)),
                None => Ok(format!("reply from {endpoint}")),
            }
        }

        async fn probe(&self, endpoint: &str, _key: &str) -> Result<()> {
            match self.failing.get(endpoint) {
                Some(err) => Err(err(endpoint)),
                None => Ok(()),
            }
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new("system", &[], "hello")
    }

    fn abc() -> EndpointFailover {
        EndpointFailover::new(vec!["A".into(), "B".into(), "C".into()])
    }

    #[tokio::test]
    async fn promotes_first_success_and_starts_there_next_time() {
        let failover = abc();
        let transport = ScriptedTransport::default().failing("A", status_503);

        let reply = failover
            .generate(&transport, "key", &request())
            .await
            .expect("reply");
        assert_eq!(reply.endpoint, "B");
        assert_eq!(reply.text, "reply from B");
        assert_eq!(transport.attempts(), vec!["A", "B"]);
        assert_eq!(failover.preferred(), Some("B"));

        failover
            .generate(&transport, "key", &request())
            .await
            .expect("reply");
        assert_eq!(transport.attempts(), vec!["A", "B", "B"]);
    }

    #[tokio::test]
    async fn blank_answer_counts_as_failure_and_is_not_promoted() {
        let failover = abc();
        let transport = ScriptedTransport::default().blank("A");

        let reply = failover
            .generate(&transport, "key", &request())
            .await
            .expect("B answers");
        assert_eq!(reply.endpoint, "B");
        assert_eq!(failover.preferred(), Some("B"));

        let transport = ScriptedTransport::default().blank("A").blank("B").blank("C");
        let failover = abc();
        assert!(matches!(
            failover.generate(&transport, "key", &request()).await,
            Err(BridgeError::EmptyReply { .. })
        ));
        assert_eq!(failover.preferred(), Some("A"));
    }

    #[tokio::test]
    async fn preferred_is_skipped_in_the_remainder() {
        let failover = abc();
        let transport = ScriptedTransport::default()
            .failing("A", status_503)
            .failing("C", empty);
        failover
            .generate(&transport, "key", &request())
            .await
            .expect("B answers");

        let transport = ScriptedTransport::default()
            .failing("B", status_503)
            .failing("A", empty);
        let reply = failover
            .generate(&transport, "key", &request())
            .await
            .expect("C answers");
        assert_eq!(transport.attempts(), vec!["B", "A", "C"]);
        assert_eq!(reply.endpoint, "C");
    }

    #[tokio::test]
    async fn all_failing_surfaces_last_error_and_keeps_preference() {
        let failover = abc();
        let transport = ScriptedTransport::default()
            .failing("A", status_503)
            .failing("B", status_503)
            .failing("C", empty);

        let err = failover
            .generate(&transport, "key", &request())
            .await
            .expect_err("all fail");
        assert!(matches!(err, BridgeError::EmptyReply { ref endpoint } if endpoint == "C"));
        assert_eq!(failover.preferred(), Some("A"));
    }

    #[tokio::test]
    async fn non_protocol_error_stops_the_walk() {
        let failover = abc();
        let transport =
            ScriptedTransport::default().failing("A", |_| BridgeError::MissingCredential);
        let err = failover
            .generate(&transport, "key", &request())
            .await
            .expect_err("credential error");
        assert!(matches!(err, BridgeError::MissingCredential));
        assert_eq!(transport.attempts(), vec!["A"]);
    }

    #[tokio::test]
    async fn empty_list_reports_no_endpoints() {
        let failover = EndpointFailover::new(Vec::new());
        let transport = ScriptedTransport::default();
        let err = failover
            .generate(&transport, "key", &request())
            .await
            .expect_err("no endpoints");
        assert!(matches!(err, BridgeError::NoEndpoints));
        assert!(!failover.probe_any(&transport, "key").await);
    }

    #[tokio::test]
    async fn probe_succeeds_if_any_endpoint_accepts() {
        let failover = abc();
        let transport = ScriptedTransport::default()
            .failing("A", status_503)
            .failing("B", status_503);
        assert!(failover.probe_any(&transport, "key").await);
        assert_eq!(failover.preferred(), Some("A"));

        let transport = ScriptedTransport::default()
            .failing("A", status_503)
            .failing("B", status_503)
            .failing("C", status_503);
        assert!(!failover.probe_any(&transport, "key").await);
    }
}
