//! Prometheus counters for the order workflow, exposed at `/metrics`.

use axum::{http::header, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ORDERS_CREATED: IntCounter = registered(
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created")
    );
    pub static ref ORDER_CREATION_FAILURES: IntCounterVec = registered(
        IntCounterVec::new(
            Opts::new(
                "order_creation_failures_total",
                "Total number of rejected or failed order creations"
            ),
            &["reason"]
        )
        .expect("metric can be created")
    );
    pub static ref ORDER_TRANSITIONS: IntCounterVec = registered(
        IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Total number of applied order status transitions"
            ),
            &["action"]
        )
        .expect("metric can be created")
    );
    pub static ref ORDER_TRANSITION_REJECTIONS: IntCounterVec = registered(
        IntCounterVec::new(
            Opts::new(
                "order_transition_rejections_total",
                "Total number of rejected order status transitions"
            ),
            &["action"]
        )
        .expect("metric can be created")
    );
}

fn registered<C: Collector + Clone + 'static>(collector: C) -> C {
    // Double registration only happens if a name is reused; keep the collector either way.
    let _ = REGISTRY.register(Box::new(collector.clone()));
    collector
}

/// Forces registration so every series is exported from the first scrape.
pub fn init() {
    lazy_static::initialize(&ORDERS_CREATED);
    lazy_static::initialize(&ORDER_CREATION_FAILURES);
    lazy_static::initialize(&ORDER_TRANSITIONS);
    lazy_static::initialize(&ORDER_TRANSITION_REJECTIONS);
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render() -> Result<String, ServiceError> {
    init();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics not utf-8: {e}")))
}

pub async fn metrics_handler() -> Result<impl IntoResponse, ServiceError> {
    let body = render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
