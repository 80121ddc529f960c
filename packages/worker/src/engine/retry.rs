use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::retry::{ConstantBackoff, RetryError, retry};

use super::error::EvalError;
use super::{Engine, Params};

/// Wraps an [`Engine`] so that `build` rides out transient failures such as
/// package mirrors being unreachable. Every other operation passes through.
pub struct RetryingEngine<E> {
    inner: E,
    policy: ConstantBackoff,
}

impl<E: Engine> RetryingEngine<E> {
    pub fn new(inner: E) -> Self {
        Self::with_policy(
            inner,
            ConstantBackoff {
                delay: Duration::from_secs(30),
                max_retries: 3,
            },
        )
    }

    pub fn with_policy(inner: E, policy: ConstantBackoff) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Engine> Engine for RetryingEngine<E> {
    async fn check(&self, params: &Params) -> Result<(), EvalError> {
        self.inner.check(params).await
    }

    async fn build(&self, params: &Params) -> Result<(), EvalError> {
        let inner = &self.inner;
        let saw_other = AtomicBool::new(false);
        let saw_other_ref = &saw_other;
        let mut policy = self.policy.clone();

        let result = retry(&mut policy, move |_| async move {
            match inner.build(params).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_status() => Err(RetryError::Permanent(e)),
                Err(e) => {
                    saw_other_ref.store(true, Ordering::Relaxed);
                    Err(RetryError::Transient(e))
                }
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(EvalError::Status { reason, .. }) if !saw_other.load(Ordering::Relaxed) => {
                Err(EvalError::failed(reason))
            }
            Err(e) => Err(EvalError::fatal(format!("building_errored: {e}"))),
        }
    }

    async fn run_pov(
        &self,
        params: &Params,
        trigger: &Path,
        crash_expected: bool,
    ) -> Result<(), EvalError> {
        self.inner.run_pov(params, trigger, crash_expected).await
    }

    async fn apply_patch(&self, params: &Params, patch: &Path) -> Result<(), EvalError> {
        self.inner.apply_patch(params, patch).await
    }

    async fn run_tests(&self, params: &Params, success_expected: bool) -> Result<(), EvalError> {
        self.inner.run_tests(params, success_expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBuilds(Mutex<VecDeque<Result<(), EvalError>>>, Mutex<u32>);

    impl ScriptedBuilds {
        fn new(results: Vec<Result<(), EvalError>>) -> Self {
            Self(Mutex::new(results.into()), Mutex::new(0))
        }

        fn calls(&self) -> u32 {
            *self.1.lock().unwrap()
        }
    }

    #[async_trait]
    impl Engine for ScriptedBuilds {
        async fn check(&self, _: &Params) -> Result<(), EvalError> {
            Ok(())
        }
        async fn build(&self, _: &Params) -> Result<(), EvalError> {
            *self.1.lock().unwrap() += 1;
            self.0.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
        async fn run_pov(&self, _: &Params, _: &Path, _: bool) -> Result<(), EvalError> {
            Ok(())
        }
        async fn apply_patch(&self, _: &Params, _: &Path) -> Result<(), EvalError> {
            Ok(())
        }
        async fn run_tests(&self, _: &Params, _: bool) -> Result<(), EvalError> {
            Ok(())
        }
    }

    fn apt() -> Result<(), EvalError> {
        Err(EvalError::Transient("apt_unreachable".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_masked() {
        let engine = RetryingEngine::new(ScriptedBuilds::new(vec![apt(), apt(), Ok(())]));
        engine.build(&Params::default()).await.unwrap();
        assert_eq!(engine.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn status_failure_is_terminal_and_not_retried() {
        let engine =
            RetryingEngine::new(ScriptedBuilds::new(vec![Err(EvalError::failed("building_failed"))]));
        let err = engine.build(&Params::default()).await.unwrap_err();
        assert!(err.is_status());
        assert_eq!(engine.inner().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_after_transient_is_building_errored() {
        let engine = RetryingEngine::new(ScriptedBuilds::new(vec![
            apt(),
            Err(EvalError::failed("building_failed")),
        ]));
        let err = engine.build(&Params::default()).await.unwrap_err();
        assert!(matches!(err, EvalError::Fatal(ref r) if r.starts_with("building_errored")));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_building_errored() {
        let engine = RetryingEngine::new(ScriptedBuilds::new(vec![apt(), apt(), apt(), apt(), apt()]));
        let err = engine.build(&Params::default()).await.unwrap_err();
        assert!(matches!(err, EvalError::Fatal(_)));
        assert_eq!(engine.inner().calls(), 4);
    }
}
