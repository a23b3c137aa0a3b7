//! Cliente HTTP del store de coordinación que sirve el master.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use common::store::{CoordinationStore, OpenMode, StoreError, StoreResult};
use common::{
    StoreErrorBody, StoreExistsResponse, StoreListResponse, StoreRequest, StoreValueResponse,
};

#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, req: &StoreRequest) -> StoreResult<T> {
        let url = format!("{}/api/v1/store/{}", self.base_url, op);
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| StoreError::Transport(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(decode_error(status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| StoreError::Transport(format!("respuesta inválida de {}: {}", url, e)))
    }
}

/// Rearma el error del store a partir de la respuesta del master.
fn decode_error(status: StatusCode, body: &str) -> StoreError {
    match serde_json::from_str::<StoreErrorBody>(body) {
        Ok(err) => err.into_error(),
        Err(_) => StoreError::Transport(format!("master devolvió {}: {}", status, body)),
    }
}

fn request(path: &str) -> StoreRequest {
    StoreRequest {
        path: path.to_string(),
        ..StoreRequest::default()
    }
}

#[async_trait]
impl CoordinationStore for HttpStore {
    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        let resp: StoreListResponse = self.call("list", &request(dir)).await?;
        Ok(resp.entries)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> StoreResult<()> {
        let req = StoreRequest {
            mode: Some(mode),
            ..request(path)
        };
        let _: StoreExistsResponse = self.call("open", &req).await?;
        Ok(())
    }

    async fn get_attribute(&self, path: &str, name: &str) -> StoreResult<String> {
        let req = StoreRequest {
            name: Some(name.to_string()),
            ..request(path)
        };
        let resp: StoreValueResponse = self.call("attribute/get", &req).await?;
        Ok(resp.value)
    }

    async fn set_attribute(&self, path: &str, name: &str, value: &str) -> StoreResult<()> {
        let req = StoreRequest {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
            ..request(path)
        };
        let _: StoreExistsResponse = self.call("attribute/set", &req).await?;
        Ok(())
    }

    async fn store_string(&self, path: &str, value: &str) -> StoreResult<()> {
        let req = StoreRequest {
            value: Some(value.to_string()),
            ..request(path)
        };
        let _: StoreExistsResponse = self.call("string/set", &req).await?;
        Ok(())
    }

    async fn retrieve_string(&self, path: &str) -> StoreResult<String> {
        let resp: StoreValueResponse = self.call("string/get", &request(path)).await?;
        Ok(resp.value)
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let resp: StoreExistsResponse = self.call("exists", &request(path)).await?;
        Ok(resp.exists)
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let _: StoreExistsResponse = self.call("remove", &request(path)).await?;
        Ok(())
    }
}
