use {
    crate::{
        config::{Config, Secret},
        domain::{
            error::PipelineError, event::CheckoutSnapshot, id::CheckoutId,
            provider::PaymentProvider,
        },
    },
    serde::Deserialize,
    std::{future::Future, pin::Pin, time::Duration},
};

/// Checkout resource as the provider API returns it. Only the fields the
/// engine reads are declared.
#[derive(Debug, Deserialize)]
struct CheckoutResource {
    id: String,
    #[serde(default)]
    checkout_reference: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    transactions: Vec<TransactionResource>,
}

#[derive(Debug, Deserialize)]
struct TransactionResource {
    id: String,
}

impl From<CheckoutResource> for CheckoutSnapshot {
    fn from(r: CheckoutResource) -> Self {
        let transaction_id = r
            .transaction_id
            .or_else(|| r.transactions.into_iter().next().map(|t| t.id));
        CheckoutSnapshot {
            checkout_id: r.id,
            checkout_reference: r.checkout_reference,
            status: r.status,
            amount: r.amount,
            currency: r.currency,
            transaction_id,
        }
    }
}

/// Status queries over HTTPS with the server-held API key.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
}

impl HttpProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::ProviderUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Self::new(
            config.provider_api_base.clone(),
            config.provider_api_key.clone(),
            config.provider_timeout,
        )
    }

    async fn fetch_checkout_inner(&self, id: &CheckoutId) -> Result<CheckoutSnapshot, PipelineError> {
        let url = format!("{}/checkouts/{}", self.base_url, id.as_str());
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.api_key.reveal())
            .send()
            .await
            .map_err(|e| PipelineError::ProviderUnavailable(format!("GET checkout {id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::ProviderUnavailable(format!(
                "GET checkout {id}: HTTP {status}"
            )));
        }

        let resource: CheckoutResource = response
            .json()
            .await
            .map_err(|e| PipelineError::ProviderUnavailable(format!("checkout {id} body: {e}")))?;
        Ok(resource.into())
    }
}

impl PaymentProvider for HttpProvider {
    fn fetch_checkout(
        &self,
        id: &CheckoutId,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSnapshot, PipelineError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move { self.fetch_checkout_inner(&id).await })
    }
}
