//! HTTP client for the order-storage REST endpoints

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::order::{Order, OrderStatus};

use crate::{ClientConfig, ClientError, ClientResult};

/// Order endpoints consumed by the engine
///
/// `HttpClient` talks to the real service; tests substitute an in-memory
/// implementation.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// `GET /orders` → active orders
    async fn fetch_active_orders(&self) -> ClientResult<Vec<Order>>;

    /// `PATCH /orders/{id}/status` → the order as the server now holds it
    async fn update_status(&self, order_id: &str, status: OrderStatus) -> ClientResult<Order>;
}

#[derive(Serialize)]
struct StatusBody {
    status: OrderStatus,
}

/// HTTP client for making network requests to the order-storage service
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client from configuration
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    /// Set the authentication token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let request = self.authorize(self.client.get(self.url(path)));
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Make a PATCH request with JSON body
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let request = self.authorize(self.client.patch(self.url(path)).json(body));
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle the HTTP response
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, text));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl OrderApi for HttpClient {
    async fn fetch_active_orders(&self) -> ClientResult<Vec<Order>> {
        self.get("/orders").await
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> ClientResult<Order> {
        tracing::debug!(order_id, %status, "PATCH order status");
        let order: Order = self
            .patch(&format!("/orders/{order_id}/status"), &StatusBody { status })
            .await?;

        if order.id != order_id {
            return Err(ClientError::InvalidResponse(format!(
                "expected order {order_id}, server returned {}",
                order.id
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = HttpClient::new(&ClientConfig::new("http://localhost:8080/api/")).unwrap();
        assert_eq!(client.url("/orders"), "http://localhost:8080/api/orders");
        assert_eq!(
            client.url("orders/7/status"),
            "http://localhost:8080/api/orders/7/status"
        );
    }

    #[test]
    fn test_status_body() {
        let body = serde_json::to_string(&StatusBody {
            status: OrderStatus::Preparing,
        })
        .unwrap();
        assert_eq!(body, r#"{"status":"preparing"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        // Port 9 (discard) on loopback is closed in test environments
        let client = HttpClient::new(&ClientConfig::new("http://127.0.0.1:9").with_timeout(2)).unwrap();
        let err = client.fetch_active_orders().await.unwrap_err();
        assert!(matches!(err, ClientError::Http(_)));
        assert!(err.is_retryable());
    }
}
