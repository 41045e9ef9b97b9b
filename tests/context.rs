//! Runner lifecycle through a shared context.

use std::sync::Arc;

use choreo_es::api::Backstage;
use choreo_es::domain::order_system;
use choreo_es::{ContextError, RunnerContext};

#[tokio::test]
async fn host_lifecycle() {
    let context = RunnerContext::new();
    assert!(matches!(context.get().await, Err(ContextError::NotInitialized)));

    let runner = context.init(order_system()).await.expect("init");
    let api = Backstage::new(Arc::clone(&runner));
    api.submit_command().await.expect("submit");

    let again = context.get().await.expect("get");
    assert!(Arc::ptr_eq(&runner, &again));
    assert!(matches!(
        context.init(order_system()).await,
        Err(ContextError::AlreadyInitialized)
    ));

    context.close().await.expect("close");
    context.close().await.expect("close is idempotent");
    assert!(matches!(context.get().await, Err(ContextError::NotInitialized)));
}
