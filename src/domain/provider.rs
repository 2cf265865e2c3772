use {
    super::error::PipelineError,
    super::event::CheckoutSnapshot,
    super::id::CheckoutId,
    std::{future::Future, pin::Pin},
};

/// Status queries against the payment provider. Any transport error,
/// timeout or non-2xx answer is `PipelineError::ProviderUnavailable`.
pub trait PaymentProvider: Send + Sync {
    fn fetch_checkout(
        &self,
        id: &CheckoutId,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSnapshot, PipelineError>> + Send + '_>>;
}
