//! Range probe, HTTP range reads, listing, and selective pull against a
//! live Range-honoring server.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ocibundle::archive::writer::write_archive;
use ocibundle::fetch::{supports_range, HttpRangeReader, ReadAt};
use ocibundle::{
    CancelToken, Client, Descriptor, Error, HttpConfig, PullOptions, PushDescriptor, Reference,
    Registry, RegistryAuth, MEDIA_TYPE,
};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ============================================================================
// A blob endpoint that honors Range requests
// ============================================================================

struct RangeBlob {
    bytes: Vec<u8>,
    range_requests: Arc<AtomicUsize>,
}

impl Respond for RangeBlob {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match range {
            Some(value) if value.starts_with("bytes=") => {
                self.range_requests.fetch_add(1, Ordering::SeqCst);
                let window = &value["bytes=".len()..];
                let (start, end) = window.split_once('-').unwrap();
                let start: usize = start.parse().unwrap();
                let end: usize = end
                    .parse::<usize>()
                    .unwrap()
                    .min(self.bytes.len().saturating_sub(1));
                let body = self.bytes[start..=end].to_vec();
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, self.bytes.len()).as_str(),
                    )
                    .set_body_bytes(body)
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.bytes.clone()),
        }
    }
}

struct ServedBlob {
    // The runtime keeps the mock server alive for the test's duration.
    _rt: tokio::runtime::Runtime,
    server: MockServer,
    digest: String,
    blob_len: u64,
    range_requests: Arc<AtomicUsize>,
}

impl ServedBlob {
    fn start(repository: &str, blob: Vec<u8>) -> Self {
        let digest = format!("sha256:{:016x}", blob.len());
        let blob_path = format!("/v2/{}/blobs/{}", repository, digest);
        let range_requests = Arc::new(AtomicUsize::new(0));
        let blob_len = blob.len() as u64;

        let rt = tokio::runtime::Runtime::new().unwrap();
        let responder = RangeBlob {
            bytes: blob,
            range_requests: Arc::clone(&range_requests),
        };
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(blob_path.as_str()))
                .respond_with(responder)
                .mount(&server)
                .await;
            server
        });

        Self {
            _rt: rt,
            server,
            digest,
            blob_len,
            range_requests,
        }
    }

    fn host(&self) -> String {
        self.server.uri().trim_start_matches("http://").to_string()
    }

    fn blob_url(&self, repository: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.server.uri(), repository, self.digest)
    }
}

/// Registry stub that resolves against the mock server but never transfers
/// content itself.
struct MetadataRegistry {
    digest: String,
    size: u64,
}

impl Registry for MetadataRegistry {
    fn resolve(&self, _reference: &Reference, _auth: &RegistryAuth) -> Result<Descriptor, Error> {
        Ok(Descriptor {
            digest: self.digest.clone(),
            media_type: MEDIA_TYPE.to_string(),
            size: self.size,
        })
    }

    fn pull(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<(Descriptor, Box<dyn Read + Send>), Error> {
        // Content rides over the range path; the stream stays empty
        Ok((self.resolve(reference, auth)?, Box::new(Cursor::new(Vec::new()))))
    }

    fn push(
        &self,
        _reference: &Reference,
        _descriptor: &PushDescriptor,
        _blob: &mut dyn Read,
        _auth: &RegistryAuth,
    ) -> Result<(), Error> {
        Err(Error::Registry(ocibundle::RegistryError::InvalidConfig {
            detail: "read-only test registry".to_string(),
        }))
    }
}

fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn archive_to_vec(source: &Path) -> Vec<u8> {
    let mut blob = Vec::new();
    write_archive(&CancelToken::new(), source, &mut blob, None).unwrap();
    blob
}

fn plain_http(host: &str) -> HttpConfig {
    HttpConfig {
        allow_http: true,
        allow_insecure: false,
        registries: vec![host.to_string()],
    }
}

// ============================================================================
// Probe
// ============================================================================

#[test]
fn probe_detects_range_support() {
    let served = ServedBlob::start("team/bundle", (0u8..=255).collect());
    assert!(supports_range(&served.blob_url("team/bundle"), false));
}

#[test]
fn probe_rejects_plain_200_servers() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        server
    });

    assert!(!supports_range(&format!("{}/blob", server.uri()), false));
}

#[test]
fn probe_treats_unreachable_as_unsupported() {
    assert!(!supports_range("http://127.0.0.1:1/blob", false));
}

// ============================================================================
// Range reader
// ============================================================================

#[test]
fn http_range_reader_fetches_windows() {
    let bytes: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
    let served = ServedBlob::start("team/bundle", bytes.clone());

    let reader =
        HttpRangeReader::new(served.blob_url("team/bundle"), served.blob_len, false).unwrap();
    assert_eq!(reader.size(), 8192);

    let mut window = [0u8; 64];
    let n = reader.read_at(&mut window, 1000).unwrap();
    assert_eq!(&window[..n], &bytes[1000..1000 + n]);

    // Tail read clamps to the blob end
    let mut tail = [0u8; 64];
    let n = reader.read_at(&mut tail, 8192 - 10).unwrap();
    assert_eq!(n, 10);
    assert_eq!(&tail[..10], &bytes[8182..]);

    assert_eq!(reader.read_at(&mut tail, 8192).unwrap(), 0);
}

// ============================================================================
// Listing over ranges
// ============================================================================

#[test]
fn list_fetches_only_footer_and_toc() {
    let source = tempdir().unwrap();
    let mut total = 0u64;
    for i in 0..20 {
        let contents = format!("File {} with some content", i);
        total += contents.len() as u64;
        write_file(source.path(), &format!("file{}.txt", i), contents.as_bytes());
    }
    let blob = archive_to_vec(source.path());
    let served = ServedBlob::start("team/bundle", blob);
    let client = Client::builder()
        .registry(MetadataRegistry {
            digest: served.digest.clone(),
            size: served.blob_len,
        })
        .http_config(plain_http(&served.host()))
        .build()
        .unwrap();

    let reference = format!("{}/team/bundle:v1", served.host());
    let result = client
        .list_files(&CancelToken::new(), &reference, &[])
        .unwrap();

    assert_eq!(result.file_count, 20);
    assert_eq!(result.dir_count, 0);
    assert_eq!(result.total_size, total);

    // Probe + footer + TOC, nothing else
    let requests = served.range_requests.load(Ordering::SeqCst);
    assert!(requests <= 3, "issued {} range requests", requests);
}

// ============================================================================
// Selective pull over ranges
// ============================================================================

#[test]
fn selective_pull_uses_the_range_path() {
    let source = tempdir().unwrap();
    write_file(source.path(), "config.json", b"{\"app\":\"test\"}");
    write_file(source.path(), "readme.txt", b"README content");
    write_file(source.path(), "data/file1.json", b"{\"data\":1}");

    let blob = archive_to_vec(source.path());
    let served = ServedBlob::start("team/bundle", blob);

    let client = Client::builder()
        .registry(MetadataRegistry {
            digest: served.digest.clone(),
            size: served.blob_len,
        })
        .http_config(plain_http(&served.host()))
        .build()
        .unwrap();

    let reference = format!("{}/team/bundle:v1", served.host());
    let base = tempdir().unwrap();
    let target = base.path().join("out");
    let options = PullOptions::new().files_to_extract(&["**/*.json"]);
    client
        .pull(&CancelToken::new(), &reference, &target, &options)
        .unwrap();

    assert_eq!(
        fs::read(target.join("config.json")).unwrap(),
        b"{\"app\":\"test\"}"
    );
    assert_eq!(
        fs::read(target.join("data/file1.json")).unwrap(),
        b"{\"data\":1}"
    );
    assert!(!target.join("readme.txt").exists());

    // The blob traveled via range requests, not the registry stream
    assert!(served.range_requests.load(Ordering::SeqCst) > 0);
}
