use anyhow::{anyhow, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::config::StorageSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Durable store for captured evidence images.
///
/// `put` writes one object and returns its publicly resolvable URL.
pub trait EvidenceStore: Send + Sync {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// S3-compatible object store over plain HTTP.
///
/// One PUT per object, named `{uuid}.jpg`. With credentials configured the
/// request carries an AWS SigV4 authorization header (UNSIGNED-PAYLOAD);
/// without them the PUT is anonymous, which suits local MinIO buckets with
/// a public write policy.
pub struct HttpObjectStore {
    settings: StorageSettings,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(settings: StorageSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(UPLOAD_TIMEOUT)
            .build();
        Self { settings, agent }
    }

    fn object_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.bucket,
            filename
        )
    }

    fn host_header(&self) -> Result<String> {
        let parsed = url::Url::parse(&self.settings.endpoint)
            .map_err(|e| anyhow!("invalid storage endpoint {}: {}", self.settings.endpoint, e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("storage endpoint {} has no host", self.settings.endpoint))?;
        Ok(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

impl EvidenceStore for HttpObjectStore {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let filename = format!("{}.jpg", Uuid::new_v4());
        let url = self.object_url(&filename);

        let mut request = self.agent.put(&url).set("Content-Type", content_type);
        if let (Some(access_key), Some(secret_key)) =
            (&self.settings.access_key, &self.settings.secret_key)
        {
            let now = Utc::now();
            let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
            let date = now.format("%Y%m%d").to_string();
            let canonical_path = format!("/{}/{}", self.settings.bucket, filename);
            let authorization = sign_v4(
                access_key,
                secret_key,
                &self.settings.region,
                &self.host_header()?,
                &canonical_path,
                &amz_date,
                &date,
            );
            request = request
                .set("x-amz-date", &amz_date)
                .set("x-amz-content-sha256", "UNSIGNED-PAYLOAD")
                .set("Authorization", &authorization);
        }

        match request.send_bytes(bytes) {
            Ok(_) => Ok(url),
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(anyhow!(
                    "storage PUT {} returned {}: {}",
                    url,
                    code,
                    detail.trim()
                ))
            }
            Err(err) => Err(anyhow!("storage PUT {} failed: {}", url, err)),
        }
    }
}

/// SigV4 authorization header for a PUT with unsigned payload.
fn sign_v4(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    canonical_path: &str,
    amz_date: &str,
    date: &str,
) -> String {
    let canonical_request = format!(
        "PUT\n{}\n\nhost:{}\nx-amz-content-sha256:UNSIGNED-PAYLOAD\nx-amz-date:{}\n\n{}\nUNSIGNED-PAYLOAD",
        canonical_path, host, amz_date, SIGNED_HEADERS
    );
    let scope = format!("{}/{}/s3/aws4_request", date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        access_key, scope, SIGNED_HEADERS, signature
    )
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK: usize = 64;
    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }
    let mut ipad = [0x36u8; BLOCK];
    let mut opad = [0x5cu8; BLOCK];
    for i in 0..BLOCK {
        ipad[i] ^= key_block[i];
        opad[i] ^= key_block[i];
    }
    let inner = Sha256::new()
        .chain_update(ipad)
        .chain_update(message)
        .finalize();
    Sha256::new()
        .chain_update(opad)
        .chain_update(inner)
        .finalize()
        .into()
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

/// In-memory store for tests and demos.
pub struct InMemoryStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn urls(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.iter().map(|(url, _)| url.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceStore for InMemoryStore {
    fn put(&self, bytes: &[u8], _content_type: &str) -> Result<String> {
        let url = format!("memory://evidence/{}.jpg", Uuid::new_v4());
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("evidence store lock poisoned"))?;
        objects.push((url.clone(), bytes.to_vec()));
        Ok(url)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_matches_rfc_4231_vector() {
        // RFC 4231 test case 2.
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sign_v4_is_deterministic_and_well_formed() {
        let auth = sign_v4(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "us-east-1",
            "127.0.0.1:9000",
            "/inspection-evidence/test.jpg",
            "20240101T000000Z",
            "20240101",
        );
        let again = sign_v4(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "us-east-1",
            "127.0.0.1:9000",
            "/inspection-evidence/test.jpg",
            "20240101T000000Z",
            "20240101",
        );
        assert_eq!(auth, again);
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/s3/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        let signature = auth.rsplit("Signature=").next().unwrap_or("");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn object_urls_join_endpoint_bucket_and_name() {
        let store = HttpObjectStore::new(StorageSettings {
            endpoint: "http://127.0.0.1:9000/".to_string(),
            bucket: "inspection-evidence".to_string(),
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
        });
        assert_eq!(
            store.object_url("abc.jpg"),
            "http://127.0.0.1:9000/inspection-evidence/abc.jpg"
        );
    }

    #[test]
    fn in_memory_store_assigns_unique_urls() -> Result<()> {
        let store = InMemoryStore::new();
        let first = store.put(b"one", "image/jpeg")?;
        let second = store.put(b"two", "image/jpeg")?;
        assert_ne!(first, second);
        assert_eq!(store.len(), 2);
        assert!(store.urls().contains(&first));
        Ok(())
    }
}
