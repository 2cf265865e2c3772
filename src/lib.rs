pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    config::{Config, Environment, ReturnUrls},
    domain::{payment::PaymentConfirmed, provider::PaymentProvider, store::PaymentStore},
    services::{
        matcher::PaymentMatcher,
        pipeline::Engine,
        reconciler::Reconciler,
        scheduler::{BackoffPolicy, RematchPolicy, RetryScheduler, chrono_delay},
        signature::SignatureVerifier,
        suppressor::DuplicateSuppressor,
    },
    std::{sync::Arc, time::Duration},
    tokio::sync::broadcast,
};

const CONFIRMED_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub provider: Arc<dyn PaymentProvider>,
    pub engine: Arc<Engine>,
    pub scheduler: Arc<RetryScheduler>,
    pub suppressor: Arc<DuplicateSuppressor>,
    pub verifier: Arc<SignatureVerifier>,
    pub environment: Environment,
    pub provider_timeout: Duration,
    pub return_urls: Arc<ReturnUrls>,
}

impl AppState {
    /// Wire every component against one store and one provider.
    pub fn new(
        config: &Config,
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let (confirmed, _) = broadcast::channel::<PaymentConfirmed>(CONFIRMED_CHANNEL_CAPACITY);
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            config.reconcile_max_retries,
            confirmed,
        ));
        let suppressor = Arc::new(DuplicateSuppressor::new(
            store.clone(),
            reconciler.clone(),
            config.suppress_window,
            config.sweep_lookback,
        ));
        let engine = Arc::new(Engine::new(
            store.clone(),
            PaymentMatcher::new(store.clone(), config.match_window),
            reconciler,
            suppressor.clone(),
            chrono_delay(config.poll.base_delay),
            chrono_delay(config.rematch_delay),
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            store.clone(),
            provider.clone(),
            engine.clone(),
            BackoffPolicy::from_settings(&config.poll),
            RematchPolicy {
                delay: config.rematch_delay,
                max_attempts: config.rematch_max_attempts,
            },
            config.provider_timeout,
        ));

        Self {
            store,
            provider,
            engine,
            scheduler,
            suppressor,
            verifier: Arc::new(SignatureVerifier::from_config(config)),
            environment: config.environment,
            provider_timeout: config.provider_timeout,
            return_urls: Arc::new(config.return_urls.clone()),
        }
    }

    pub fn subscribe_confirmed(&self) -> broadcast::Receiver<PaymentConfirmed> {
        self.engine.reconciler().subscribe()
    }
}
