//! End-to-end tests against a live server backed by stub translators

use assert_json_diff::assert_json_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use opus_translator::{
    spawn_server, ModelEntry, ModelRegistry, ModelSource, ServerHandle, TranslationError,
    Translator,
};

/// Word-by-word dictionary translator that counts its calls
struct Dictionary {
    name: &'static str,
    words: &'static [(&'static str, &'static str)],
    calls: AtomicUsize,
}

impl Translator for Dictionary {
    fn translate(&self, text: &str) -> Result<String, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let translated: Vec<&str> = text
            .split_whitespace()
            .map(|word| {
                self.words
                    .iter()
                    .find(|(from, _)| from.eq_ignore_ascii_case(word))
                    .map(|(_, to)| *to)
                    .unwrap_or(word)
            })
            .collect();
        Ok(translated.join(" "))
    }

    fn name(&self) -> &str {
        self.name
    }
}

struct Broken;

impl Translator for Broken {
    fn translate(&self, _text: &str) -> Result<String, TranslationError> {
        Err(TranslationError::InferenceError {
            message: "shape mismatch".to_string(),
        })
    }

    fn name(&self) -> &str {
        "broken"
    }
}

const EN_ES: &[(&str, &str)] = &[("hello", "hola"), ("world", "mundo"), ("friend", "amigo")];
const ES_EN: &[(&str, &str)] = &[("hola", "hello"), ("mundo", "world"), ("amigo", "friend")];

struct TestServer {
    handle: ServerHandle,
    client: reqwest::Client,
    en_es: Arc<Dictionary>,
}

impl TestServer {
    async fn start() -> Self {
        let en_es = Arc::new(Dictionary {
            name: "en-es",
            words: EN_ES,
            calls: AtomicUsize::new(0),
        });
        let es_en = Arc::new(Dictionary {
            name: "es-en",
            words: ES_EN,
            calls: AtomicUsize::new(0),
        });

        let registry = ModelRegistry::from_entries([
            ModelEntry::new(ModelSource::opus_mt("en-es".parse().unwrap()), en_es.clone()),
            ModelEntry::new(ModelSource::opus_mt("es-en".parse().unwrap()), es_en),
            ModelEntry::new(ModelSource::opus_mt("en-de".parse().unwrap()), Arc::new(Broken)),
        ])
        .unwrap();

        let handle = spawn_server("127.0.0.1", 0, Arc::new(registry)).await.unwrap();

        Self {
            handle,
            client: reqwest::Client::new(),
            en_es,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.handle.local_addr(), path)
    }

    async fn translate(&self, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url("/translate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn translates_every_registered_pair() {
    let server = TestServer::start().await;

    let (status, body) = server.translate(json!({"text": "hello world", "lang": "en-es"})).await;
    assert_eq!(status, 200);
    assert_json_eq!(body, json!({"translation": "hola mundo"}));

    let (status, body) = server.translate(json!({"text": "hola amigo", "lang": "es-en"})).await;
    assert_eq!(status, 200);
    assert_json_eq!(body, json!({"translation": "hello friend"}));

    tokio_test::assert_ok!(server.handle.shutdown().await);
}

#[tokio::test]
async fn empty_or_missing_text_is_rejected() {
    let server = TestServer::start().await;
    let expected = json!({"error": "No se proporcionó texto para traducir"});

    let (status, body) = server.translate(json!({"text": "", "lang": "en-es"})).await;
    assert_eq!(status, 400);
    assert_json_eq!(body, expected);

    let (status, body) = server.translate(json!({"lang": "es-en"})).await;
    assert_eq!(status, 400);
    assert_json_eq!(body, expected);

    let (status, body) = server.translate(json!({"text": null, "lang": "en-es"})).await;
    assert_eq!(status, 400);
    assert_json_eq!(body, expected);

    // Text is checked before the language
    let (status, body) = server.translate(json!({"text": "", "lang": "fr-de"})).await;
    assert_eq!(status, 400);
    assert_json_eq!(body, expected);

    assert_eq!(server.en_es.calls.load(Ordering::SeqCst), 0);
    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsupported_language_is_rejected() {
    let server = TestServer::start().await;
    let expected = json!({"error": "Idioma no soportado"});

    for lang in [json!("fr-de"), json!("english"), json!(""), Value::Null] {
        let (status, body) = server.translate(json!({"text": "hello", "lang": lang.clone()})).await;
        assert_eq!(status, 400, "lang {}", lang);
        assert_json_eq!(body, expected);
    }

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_lang_defaults_to_en_es() {
    let server = TestServer::start().await;

    let (default_status, default_body) = server.translate(json!({"text": "hello friend"})).await;
    let (explicit_status, explicit_body) = server
        .translate(json!({"text": "hello friend", "lang": "en-es"}))
        .await;

    assert_eq!(default_status, 200);
    assert_eq!(explicit_status, 200);
    assert_json_eq!(default_body, explicit_body);
    assert_json_eq!(default_body, json!({"translation": "hola amigo"}));

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/translate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    let (status, body) = server.translate(json!({"text": 42})).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn inference_failure_is_a_server_error() {
    let server = TestServer::start().await;

    let (status, body) = server.translate(json!({"text": "hello", "lang": "en-de"})).await;
    assert_eq!(status, 500);
    assert_json_eq!(body, json!({"error": "Error interno del servidor"}));

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn index_serves_the_form() {
    let server = TestServer::start().await;

    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/html"));

    let page = response.text().await.unwrap();
    assert!(page.contains("<form"));
    assert!(page.contains(r#"action="/translate""#));
    assert!(page.contains(r#"<option value="en-es">"#));
    assert!(page.contains(r#"<option value="es-en">"#));

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/translate"))
        .header("origin", "http://example.com")
        .json(&json!({"text": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    let preflight = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/translate"))
        .header("origin", "http://example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    assert!(preflight
        .headers()
        .contains_key("access-control-allow-methods"));

    let index = server
        .client
        .get(server.url("/"))
        .header("origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert!(index.headers().contains_key("access-control-allow-origin"));

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_identical_requests_run_independently() {
    let server = TestServer::start().await;

    let requests: Vec<_> = (0..8)
        .map(|_| {
            let client = server.client.clone();
            let url = server.url("/translate");
            tokio::spawn(async move {
                let response = client
                    .post(url)
                    .json(&json!({"text": "hello world", "lang": "en-es"}))
                    .send()
                    .await
                    .unwrap();
                let status = response.status().as_u16();
                (status, response.json::<Value>().await.unwrap())
            })
        })
        .collect();

    for request in requests {
        let (status, body) = request.await.unwrap();
        assert_eq!(status, 200);
        assert_json_eq!(body, json!({"translation": "hola mundo"}));
    }

    // No deduplication: every request ran the model
    assert_eq!(server.en_es.calls.load(Ordering::SeqCst), 8);

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn health_and_languages_describe_the_registry() {
    let server = TestServer::start().await;

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_json_eq!(health["languages"], json!(["en-de", "en-es", "es-en"]));

    let languages: Value = server
        .client
        .get(server.url("/languages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_json_eq!(
        languages["languages"][1],
        json!({"lang": "en-es", "repo_id": "Helsinki-NLP/opus-mt-en-es", "revision": "main"})
    );

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_the_listener() {
    let server = TestServer::start().await;
    let url = server.url("/health");

    let response = server.client.get(&url).send().await.unwrap();
    assert!(response.status().is_success());

    server.handle.shutdown().await.unwrap();

    let fresh = reqwest::Client::new();
    assert!(fresh.get(&url).send().await.is_err());
}
