//! AI commentary on a hospital's monthly indicators.
//!
//! The filtered rows are reduced to a markdown digest, wrapped in a fixed
//! instruction template and sent to a text-completion service. Responses
//! are memoized per (hospital, range, digest) so repeated views of the same
//! selection never hit the network twice.

use crate::config::GeminiConfig;
use crate::error::{DashboardError, Result};
use crate::format::format_number;
use crate::types::{Period, Record};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{debug, info, warn};

/// Opaque text-completion service.
pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str, temperature: Option<f32>) -> Result<String>;
}

#[derive(Tabled)]
struct DigestRow {
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Efficiency")]
    efficiency: String,
    #[tabled(rename = "SusBeds")]
    sus_beds: String,
    #[tabled(rename = "Production")]
    production: String,
    #[tabled(rename = "PhysicianHours")]
    physician_hours: String,
    #[tabled(rename = "NursingHours")]
    nursing_hours: String,
}

/// Markdown table of the monthly rows, one line per period in ascending
/// order. Deterministic for a given input.
pub fn build_digest(records: &[Record]) -> String {
    let mut ordered: Vec<&Record> = records.iter().collect();
    ordered.sort_by_key(|r| r.period);
    let rows: Vec<DigestRow> = ordered
        .into_iter()
        .map(|r| DigestRow {
            period: r.period.to_string(),
            efficiency: format_number(r.efficiency_score, 4, false),
            sus_beds: format_number(r.sus_beds_count, 0, false),
            production: format_number(r.production_value, 2, true),
            physician_hours: format_number(r.physician_hours, 0, false),
            nursing_hours: format_number(r.nursing_hours, 0, false),
        })
        .collect();
    Table::new(rows).with(Style::markdown()).to_string()
}

pub fn build_prompt(hospital_id: &str, start: Period, end: Period, digest: &str) -> String {
    format!(
        r#"Tarefa: analise a evolução da eficiência do hospital CNES {hospital_id} entre {start} e {end}.

Contexto:
- Eficiência: score DEA entre 0 (menos eficiente) e 1 (mais eficiente).
- Insumos: salas (CNES_SALAS), leitos SUS (CNES_LEITOS_SUS), horas médicas (HORAS_MEDICOS), horas de enfermagem (HORAS_ENFERMAGEM).
- Produto: valor da produção ambulatorial e hospitalar (SIA_SIH_VALOR).
- Mais insumos sem produção proporcional tendem a reduzir a eficiência; menos insumos com produção mantida ou maior tendem a aumentá-la.

Dados mensais:
{digest}

Instruções:
1. Responda em português brasileiro, em 3 a 5 frases.
2. Use apenas os dados da tabela e o período informado.
3. Descreva as tendências da eficiência e diga se elas são coerentes com a variação dos insumos e da produção.
4. Não especule sobre causas externas, não faça recomendações e não mencione DEA explicitamente.
"#
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NarrativeKey {
    hospital_id: String,
    start: Period,
    end: Period,
    digest_hash: [u8; 32],
}

fn hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// Builds the digest and prompt, calls the service and memoizes answers.
/// Only successful responses are cached.
pub struct NarrativeRequester<C: TextCompletion> {
    client: Option<C>,
    temperature: Option<f32>,
    cache: HashMap<NarrativeKey, String>,
}

impl<C: TextCompletion> NarrativeRequester<C> {
    pub fn new(client: Option<C>, temperature: Option<f32>) -> Self {
        Self {
            client,
            temperature,
            cache: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    #[cfg(test)]
    pub fn cached_responses(&self) -> usize {
        self.cache.len()
    }

    pub fn request(
        &mut self,
        hospital_id: &str,
        start: Period,
        end: Period,
        records: &[Record],
    ) -> Result<String> {
        let client = self.client.as_ref().ok_or_else(|| {
            DashboardError::ServiceUnavailable(
                "Gemini API key not configured (set GEMINI_API_KEY)".to_string(),
            )
        })?;

        let digest = build_digest(records);
        let key = NarrativeKey {
            hospital_id: hospital_id.to_string(),
            start,
            end,
            digest_hash: hash(&digest),
        };
        if let Some(text) = self.cache.get(&key) {
            debug!(hospital_id, %start, %end, "narrative cache hit");
            return Ok(text.clone());
        }

        let prompt = build_prompt(hospital_id, start, end, &digest);
        info!(hospital_id, %start, %end, rows = records.len(), "requesting narrative analysis");
        let text = client.complete(&prompt, self.temperature)?;
        self.cache.insert(key, text.clone());
        Ok(text)
    }

    /// Send a raw prompt, bypassing digest and cache.
    pub fn ask(&self, prompt: &str) -> Result<String> {
        let client = self.client.as_ref().ok_or_else(|| {
            DashboardError::ServiceUnavailable(
                "Gemini API key not configured (set GEMINI_API_KEY)".to_string(),
            )
        })?;
        client.complete(prompt, self.temperature)
    }
}

/// Gemini `generateContent` REST client.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DashboardError::ServiceUnavailable(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &str) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        DashboardError::ServiceUnavailable(format!("unexpected response from Gemini: {}", e))
    })?;
    let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
        DashboardError::ServiceUnavailable("Gemini returned no candidates".to_string())
    })?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(DashboardError::ServiceUnavailable(format!(
            "Gemini returned an empty answer (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}

impl TextCompletion for GeminiClient {
    fn complete(&self, prompt: &str, temperature: Option<f32>) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: temperature.map(|temperature| GenerationConfig { temperature }),
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DashboardError::ServiceUnavailable(format!(
                        "request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    DashboardError::ServiceUnavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| DashboardError::ServiceUnavailable(format!("unreadable response: {}", e)))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Gemini API returned an error");
            if text.contains("API key not valid") {
                return Err(DashboardError::ServiceUnavailable(
                    "invalid Gemini API key".to_string(),
                ));
            }
            return Err(DashboardError::ServiceUnavailable(format!(
                "Gemini API error ({}): {}",
                status, text
            )));
        }
        extract_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::tests::record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockCompletion {
        response: Result<String>,
        calls: AtomicUsize,
    }

    impl MockCompletion {
        fn ok(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(DashboardError::ServiceUnavailable("boom".into())),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextCompletion for MockCompletion {
        fn complete(&self, _prompt: &str, _temperature: Option<f32>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(DashboardError::ServiceUnavailable(e.to_string())),
            }
        }
    }

    impl TextCompletion for &MockCompletion {
        fn complete(&self, prompt: &str, temperature: Option<f32>) -> Result<String> {
            (**self).complete(prompt, temperature)
        }
    }

    fn series() -> Vec<Record> {
        vec![
            record("0000123", 2020, 2, Some(0.6), Some(0.0)),
            record("0000123", 2020, 1, Some(0.5), Some(1234.5)),
        ]
    }

    fn range() -> (Period, Period) {
        (Period::from_ym(2020, 1).unwrap(), Period::from_ym(2020, 2).unwrap())
    }

    #[test]
    fn digest_is_ordered_markdown() {
        let digest = build_digest(&series());
        let lines: Vec<&str> = digest.lines().collect();
        assert!(lines[0].contains("Period"));
        assert!(lines[0].contains("Efficiency"));
        assert!(lines[2].contains("01/2020"));
        assert!(lines[2].contains("0.5000"));
        assert!(lines[2].contains("1,234.50"));
        assert!(lines[3].contains("02/2020"));
    }

    #[test]
    fn digest_marks_unknown_values() {
        let mut r = record("0000123", 2020, 1, None, None);
        r.nursing_hours = None;
        let digest = build_digest(&[r]);
        assert!(digest.lines().nth(2).unwrap().contains(" - "));
    }

    #[test]
    fn prompt_embeds_context_and_digest() {
        let (start, end) = range();
        let prompt = build_prompt("0000123", start, end, "| table |");
        assert!(prompt.contains("0000123"));
        assert!(prompt.contains("01/2020"));
        assert!(prompt.contains("02/2020"));
        assert!(prompt.contains("| table |"));
    }

    #[test]
    fn response_is_returned_verbatim_and_memoized() {
        let mock = MockCompletion::ok("  A eficiência caiu.\n");
        let mut requester = NarrativeRequester::new(Some(&mock), None);
        let (start, end) = range();
        let first = requester.request("0000123", start, end, &series()).unwrap();
        let second = requester.request("0000123", start, end, &series()).unwrap();
        assert_eq!(first, "  A eficiência caiu.\n");
        assert_eq!(first, second);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(requester.cached_responses(), 1);
    }

    #[test]
    fn different_digest_triggers_new_call() {
        let mock = MockCompletion::ok("ok");
        let mut requester = NarrativeRequester::new(Some(&mock), None);
        let (start, end) = range();
        requester.request("0000123", start, end, &series()).unwrap();
        let mut changed = series();
        changed[0].efficiency_score = Some(0.7);
        requester.request("0000123", start, end, &changed).unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let mock = MockCompletion::failing();
        let mut requester = NarrativeRequester::new(Some(&mock), None);
        let (start, end) = range();
        let err = requester.request("0000123", start, end, &series()).unwrap_err();
        assert!(err.is_service_error());
        assert!(requester.request("0000123", start, end, &series()).is_err());
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
        assert_eq!(requester.cached_responses(), 0);
    }

    #[test]
    fn missing_client_is_service_unavailable() {
        let mut requester: NarrativeRequester<MockCompletion> = NarrativeRequester::new(None, None);
        assert!(!requester.is_enabled());
        let (start, end) = range();
        let err = requester.request("0000123", start, end, &series()).unwrap_err();
        assert!(matches!(err, DashboardError::ServiceUnavailable(_)));
        assert!(requester.ask("ping").is_err());
    }

    #[test]
    fn extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Olá, "},{"text":"mundo"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(extract_text(body).unwrap(), "Olá, mundo");
    }

    #[test]
    fn extract_text_rejects_empty_answers() {
        let blocked = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let err = extract_text(blocked).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(extract_text(r#"{"candidates":[]}"#).is_err());
        assert!(extract_text("not json").is_err());
    }

    #[test]
    fn gemini_client_builds_endpoint() {
        let cfg = GeminiConfig {
            api_key: "k".into(),
            model: "gemini-1.5-flash".into(),
            base_url: "https://example.test/v1beta/".into(),
            temperature: None,
            timeout_secs: 5,
        };
        let client = GeminiClient::new(&cfg).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn request_body_omits_absent_temperature() {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert!(json.get("generationConfig").is_none());
    }
}
