//! # Resilient Invoker
//!
//! Calls an ordered chain of interchangeable capabilities and returns the first
//! validated result.
//!
//! Per capability: up to `max_retries` attempts, each bounded by the capability
//! timeout and separated by its fixed `retry_delay`. A `ProviderDown` answer ends
//! the capability's attempts at once and moves on to the next one. A result that
//! does not match the capability's declared [`ResultKind`] is a failed attempt.
//! When the chain
//! guards against echoes, a result that is the input media in disguise counts as a
//! failed attempt.

use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::CircuitBreakerConfig;
use crate::errors::{InvokeFailure, RemoteError};
use crate::remote::capability::{is_echo, CapabilityRequest, RemoteCapability, ResultKind};

struct ChainLink {
    capability: Arc<dyn RemoteCapability>,
    breaker: CircuitBreaker,
}

/// An ordered capability chain for one semantic operation
pub struct ResilientInvoker {
    name: String,
    links: Vec<ChainLink>,
    reject_echo: bool,
}

impl ResilientInvoker {
    pub fn new(
        name: impl Into<String>,
        capabilities: Vec<Arc<dyn RemoteCapability>>,
        breaker: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            links: capabilities
                .into_iter()
                .map(|capability| ChainLink {
                    capability,
                    breaker: CircuitBreaker::new(breaker.clone()),
                })
                .collect(),
            reject_echo: false,
        }
    }

    /// Treat results that merely echo the input media as failures
    pub fn rejecting_echo(mut self) -> Self {
        self.reject_echo = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.capability.name()).collect()
    }

    fn check_echo(&self, request: &CapabilityRequest, result: String) -> Result<String, RemoteError> {
        if self.reject_echo && request.media.iter().any(|input| is_echo(input, &result)) {
            return Err(RemoteError::Degenerate);
        }
        Ok(result)
    }

    async fn attempt(&self, capability: &dyn RemoteCapability, request: &CapabilityRequest) -> Result<String, RemoteError> {
        let limit = capability.policy().timeout;
        match timeout(limit, capability.call(request)).await {
            Ok(outcome) => outcome
                .and_then(|result| check_kind(capability.result_kind(), result))
                .and_then(|result| self.check_echo(request, result)),
            Err(_) => Err(RemoteError::Timeout(limit)),
        }
    }

    /// Return the first validated result of the chain
    pub async fn invoke(&self, request: &CapabilityRequest) -> Result<String, InvokeFailure> {
        let mut failures = Vec::with_capacity(self.links.len());

        for link in &self.links {
            let capability = link.capability.as_ref();
            let name = capability.name().to_string();

            if link.breaker.is_open() {
                warn!(chain = %self.name, capability = %name, "Circuit open, skipping capability");
                failures.push((name, RemoteError::CircuitOpen));
                continue;
            }

            let policy = capability.policy().clone();
            let max_attempts = policy.max_retries.max(1);
            let mut last_error = RemoteError::CircuitOpen;

            for attempt in 1..=max_attempts {
                match self.attempt(capability, request).await {
                    Ok(result) => {
                        link.breaker.record_success();
                        info!(chain = %self.name, capability = %name, attempt, "Capability succeeded");
                        return Ok(result);
                    }
                    Err(err) => {
                        warn!(
                            chain = %self.name,
                            capability = %name,
                            attempt,
                            max_attempts,
                            error = %err,
                            "Capability attempt failed"
                        );
                        let retry = err.is_retryable() && attempt < max_attempts;
                        last_error = err;
                        if !retry {
                            break;
                        }
                        if !policy.retry_delay.is_zero() {
                            sleep(policy.retry_delay).await;
                        }
                    }
                }
            }

            link.breaker.record_failure();
            failures.push((name, last_error));
        }

        let failure = InvokeFailure { attempts: failures };
        error!(chain = %self.name, %failure, "Capability chain exhausted");
        Err(failure)
    }
}

fn check_kind(kind: ResultKind, result: String) -> Result<String, RemoteError> {
    if kind.accepts(&result) {
        Ok(result)
    } else {
        Err(RemoteError::InvalidPayload(format!("not a {kind:?} result")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted outcomes, repeating the last one
    struct Scripted {
        name: &'static str,
        policy: RetryPolicy,
        script: Mutex<Vec<Result<String, RemoteError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, retries: u32, script: Vec<Result<String, RemoteError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                policy: RetryPolicy::new(retries, 0, 5),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteCapability for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn result_kind(&self) -> ResultKind {
            ResultKind::ImageUrl
        }

        fn policy(&self) -> &RetryPolicy {
            &self.policy
        }

        async fn call(&self, _request: &CapabilityRequest) -> Result<String, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap();
            script[n.min(script.len() - 1)].clone()
        }
    }

    fn chain(caps: Vec<Arc<Scripted>>) -> ResilientInvoker {
        let caps: Vec<Arc<dyn RemoteCapability>> = caps
            .into_iter()
            .map(|c| c as Arc<dyn RemoteCapability>)
            .collect();
        ResilientInvoker::new("test", caps, &CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let a = Scripted::new(
            "a",
            3,
            vec![
                Err(RemoteError::HttpStatus(503)),
                Ok("https://x/ok.png".into()),
            ],
        );
        let invoker = chain(vec![a.clone()]);

        let result = invoker.invoke(&CapabilityRequest::text("p")).await;
        assert_eq!(result.unwrap(), "https://x/ok.png");
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_down_moves_to_next_capability() {
        let a = Scripted::new("a", 3, vec![Err(RemoteError::ProviderDown("server is down".into()))]);
        let b = Scripted::new("b", 2, vec![Ok("https://x/b.png".into())]);
        let invoker = chain(vec![a.clone(), b.clone()]);

        let result = invoker.invoke(&CapabilityRequest::text("p")).await;
        assert_eq!(result.unwrap(), "https://x/b.png");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_result_of_the_wrong_kind_falls_through() {
        let a = Scripted::new("a", 2, vec![Ok("Sorry, I can only draw cats".into())]);
        let b = Scripted::new("b", 1, vec![Ok("https://x/b.png".into())]);
        let invoker = chain(vec![a.clone(), b.clone()]);

        let result = invoker.invoke(&CapabilityRequest::text("p")).await;
        assert_eq!(result.unwrap(), "https://x/b.png");
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_capability() {
        let a = Scripted::new("a", 1, vec![Err(RemoteError::InvalidPayload("x".into()))]);
        let b = Scripted::new("b", 1, vec![Ok("https://x/b.png".into())]);
        let caps: Vec<Arc<dyn RemoteCapability>> = vec![a.clone(), b.clone()];
        let invoker = ResilientInvoker::new(
            "test",
            caps,
            &CircuitBreakerConfig {
                threshold: 1,
                reset_after: Duration::from_secs(60),
            },
        );

        invoker.invoke(&CapabilityRequest::text("p")).await.unwrap();
        invoker.invoke(&CapabilityRequest::text("p")).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_lists_every_capability() {
        let a = Scripted::new("a", 1, vec![Err(RemoteError::HttpStatus(500))]);
        let b = Scripted::new("b", 1, vec![Err(RemoteError::Transport("reset".into()))]);
        let failure = chain(vec![a, b])
            .invoke(&CapabilityRequest::text("p"))
            .await
            .unwrap_err();

        let names: Vec<_> = failure.attempts.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(failure.attempts[0].1, RemoteError::HttpStatus(500));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        struct Slow(RetryPolicy);

        #[async_trait]
        impl RemoteCapability for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            fn result_kind(&self) -> ResultKind {
                ResultKind::Text
            }
            fn policy(&self) -> &RetryPolicy {
                &self.0
            }
            async fn call(&self, _request: &CapabilityRequest) -> Result<String, RemoteError> {
                sleep(Duration::from_secs(3600)).await;
                Ok("late".into())
            }
        }

        let invoker = ResilientInvoker::new(
            "slow",
            vec![Arc::new(Slow(RetryPolicy {
                max_retries: 1,
                retry_delay: Duration::ZERO,
                timeout: Duration::from_millis(50),
            }))],
            &CircuitBreakerConfig::default(),
        );
        let failure = invoker.invoke(&CapabilityRequest::text("p")).await.unwrap_err();
        assert_eq!(failure.attempts[0].1, RemoteError::Timeout(Duration::from_millis(50)));
    }
}
