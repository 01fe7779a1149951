use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    ApiKey, FunctionDeploy, ManagementApi, ProjectApi, ProjectKeys, RemoteFunction, RemoteProject,
    SecretValue,
};
use crate::config::validate_remote_url;
use crate::error::AppError;

// ============================================================================
// Helpers
// ============================================================================

/// Convert any displayable error into `AppError::Remote`.
fn remote_err(e: impl std::fmt::Display) -> AppError {
    AppError::Remote(e.to_string())
}

fn build_http(timeout_secs: u64) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(remote_err)
}

fn normalize_base(base_url: &str) -> Result<String, AppError> {
    let parsed = validate_remote_url(base_url)?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Percent-encode each segment of an object path, keeping the separators.
fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Send a request, check the status code, and deserialize the JSON response.
async fn send_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T, AppError> {
    req.send()
        .await
        .map_err(remote_err)?
        .error_for_status()
        .map_err(remote_err)?
        .json()
        .await
        .map_err(remote_err)
}

/// Send a request, check the status code, and discard the response body.
async fn send_ok(req: reqwest::RequestBuilder) -> Result<(), AppError> {
    req.send()
        .await
        .map_err(remote_err)?
        .error_for_status()
        .map_err(remote_err)?;
    Ok(())
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Serialize)]
struct DeployMetadata<'a> {
    name: &'a str,
    entrypoint_path: &'a str,
    verify_jwt: bool,
}

#[derive(Deserialize)]
struct SecretListEntry {
    name: String,
}

#[derive(Serialize)]
struct CreateUserBody<'a> {
    email: &'a str,
    password: &'a str,
    email_confirm: bool,
}

#[derive(Deserialize)]
struct CreatedUser {
    id: String,
}

#[derive(Serialize)]
struct PasswordGrantBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
struct DeletePrefixesBody<'a> {
    prefixes: [&'a str; 1],
}

// ============================================================================
// ManagementClient
// ============================================================================

/// Client for the account-level management API (`/v1/...`).
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl ManagementClient {
    pub fn new(base_url: &str, access_token: &str, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            base_url: normalize_base(base_url)?,
            access_token: access_token.to_string(),
        })
    }

    /// Build an authenticated request to the given endpoint path.
    fn authed(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
    }
}

#[async_trait]
impl ManagementApi for ManagementClient {
    /// `GET /v1/projects`
    async fn list_projects(&self) -> Result<Vec<RemoteProject>, AppError> {
        send_json(self.authed(reqwest::Method::GET, "/v1/projects")).await
    }

    /// `GET /v1/projects/{ref}/api-keys` -- picks out the anon and service keys.
    async fn project_keys(&self, project_ref: &str) -> Result<ProjectKeys, AppError> {
        let path = format!("/v1/projects/{}/api-keys", urlencoding::encode(project_ref));
        let keys: Vec<ApiKey> = send_json(self.authed(reqwest::Method::GET, &path)).await?;

        let find = |name: &str| {
            keys.iter()
                .find(|k| k.name == name)
                .map(|k| k.api_key.clone())
                .ok_or_else(|| AppError::Remote(format!("Project has no {name} key")))
        };
        Ok(ProjectKeys {
            anon_key: find("anon")?,
            service_role_key: find("service_role")?,
        })
    }

    /// `GET /v1/projects/{ref}/functions`
    async fn list_functions(&self, project_ref: &str) -> Result<Vec<RemoteFunction>, AppError> {
        let path = format!("/v1/projects/{}/functions", urlencoding::encode(project_ref));
        send_json(self.authed(reqwest::Method::GET, &path)).await
    }

    /// `POST /v1/projects/{ref}/functions/deploy?slug={slug}` -- multipart
    /// metadata plus the zipped sources.
    async fn deploy_function(
        &self,
        project_ref: &str,
        deploy: &FunctionDeploy,
    ) -> Result<RemoteFunction, AppError> {
        let path = format!(
            "/v1/projects/{}/functions/deploy?slug={}",
            urlencoding::encode(project_ref),
            urlencoding::encode(&deploy.slug)
        );
        let metadata = serde_json::to_string(&DeployMetadata {
            name: &deploy.slug,
            entrypoint_path: &deploy.entrypoint,
            verify_jwt: deploy.verify_jwt,
        })?;

        let metadata_part = reqwest::multipart::Part::text(metadata)
            .mime_str("application/json")
            .map_err(remote_err)?;
        let file_part = reqwest::multipart::Part::bytes(deploy.archive.clone())
            .file_name(format!("{}.zip", deploy.slug))
            .mime_str("application/zip")
            .map_err(remote_err)?;
        let form = reqwest::multipart::Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        send_json(self.authed(reqwest::Method::POST, &path).multipart(form)).await
    }

    /// `GET /v1/projects/{ref}/secrets`
    async fn list_secret_names(&self, project_ref: &str) -> Result<Vec<String>, AppError> {
        let path = format!("/v1/projects/{}/secrets", urlencoding::encode(project_ref));
        let entries: Vec<SecretListEntry> = send_json(self.authed(reqwest::Method::GET, &path)).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    /// `POST /v1/projects/{ref}/secrets`
    async fn create_secrets(&self, project_ref: &str, secrets: &[SecretValue]) -> Result<(), AppError> {
        let path = format!("/v1/projects/{}/secrets", urlencoding::encode(project_ref));
        send_ok(self.authed(reqwest::Method::POST, &path).json(secrets)).await
    }

    /// `GET /v1/projects/{ref}/config/auth`
    async fn get_auth_config(&self, project_ref: &str) -> Result<serde_json::Value, AppError> {
        let path = format!("/v1/projects/{}/config/auth", urlencoding::encode(project_ref));
        send_json(self.authed(reqwest::Method::GET, &path)).await
    }

    /// `PATCH /v1/projects/{ref}/config/auth`
    async fn patch_auth_config(
        &self,
        project_ref: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError> {
        let path = format!("/v1/projects/{}/config/auth", urlencoding::encode(project_ref));
        send_ok(self.authed(reqwest::Method::PATCH, &path).json(patch)).await
    }
}

// ============================================================================
// ProjectClient
// ============================================================================

/// Client for one project's storage, admin-auth and function endpoints.
pub struct ProjectClient {
    http: reqwest::Client,
    base_url: String,
    keys: ProjectKeys,
}

impl ProjectClient {
    pub fn new(base_url: &str, keys: ProjectKeys, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            base_url: normalize_base(base_url)?,
            keys,
        })
    }

    /// Request carrying the service-role key.
    fn service(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.keys.service_role_key)
            .header("apikey", &self.keys.service_role_key)
    }

    /// Request carrying the anon key, as a browser client would.
    fn anon(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.keys.anon_key)
            .header("apikey", &self.keys.anon_key)
    }
}

#[async_trait]
impl ProjectApi for ProjectClient {
    /// `POST /storage/v1/object/{bucket}/{path}` (upsert).
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), AppError> {
        let url_path = format!(
            "/storage/v1/object/{}/{}",
            urlencoding::encode(bucket),
            encode_object_path(path)
        );
        let req = self
            .service(reqwest::Method::POST, &url_path)
            .header("x-upsert", "true")
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes);
        send_ok(req).await
    }

    /// `GET /storage/v1/object/{bucket}/{path}`
    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, AppError> {
        let url_path = format!(
            "/storage/v1/object/{}/{}",
            urlencoding::encode(bucket),
            encode_object_path(path)
        );
        let bytes = self
            .service(reqwest::Method::GET, &url_path)
            .send()
            .await
            .map_err(remote_err)?
            .error_for_status()
            .map_err(remote_err)?
            .bytes()
            .await
            .map_err(remote_err)?;
        Ok(bytes.to_vec())
    }

    /// `DELETE /storage/v1/object/{bucket}` with `{prefixes: [path]}`.
    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), AppError> {
        let url_path = format!("/storage/v1/object/{}", urlencoding::encode(bucket));
        let req = self
            .service(reqwest::Method::DELETE, &url_path)
            .json(&DeletePrefixesBody { prefixes: [path] });
        send_ok(req).await
    }

    /// `POST /auth/v1/admin/users`
    async fn create_user(&self, email: &str, password: &str) -> Result<String, AppError> {
        let req = self
            .service(reqwest::Method::POST, "/auth/v1/admin/users")
            .json(&CreateUserBody { email, password, email_confirm: true });
        let user: CreatedUser = send_json(req).await?;
        Ok(user.id)
    }

    /// `DELETE /auth/v1/admin/users/{id}`
    async fn delete_user(&self, user_id: &str) -> Result<(), AppError> {
        let path = format!("/auth/v1/admin/users/{}", urlencoding::encode(user_id));
        send_ok(self.service(reqwest::Method::DELETE, &path)).await
    }

    /// `POST /auth/v1/token?grant_type=password`
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<String, AppError> {
        let req = self
            .anon(reqwest::Method::POST, "/auth/v1/token?grant_type=password")
            .json(&PasswordGrantBody { email, password });
        let token: TokenResponse = send_json(req).await?;
        Ok(token.access_token)
    }

    /// `POST /functions/v1/{name}` -- the status is returned, not checked.
    async fn invoke_function(&self, name: &str, payload: &serde_json::Value) -> Result<u16, AppError> {
        let path = format!("/functions/v1/{}", urlencoding::encode(name));
        let resp = self
            .anon(reqwest::Method::POST, &path)
            .json(payload)
            .send()
            .await
            .map_err(remote_err)?;
        Ok(resp.status().as_u16())
    }
}
