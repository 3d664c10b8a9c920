//! Claim extraction and the batched HTTP claim-validation client, bounded by
//! a process-wide concurrency limit with a final semaphore-bypass fallback.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::models::{Claim, ClaimValidation, Speaker, Validity};

const MIN_CLAIM_LEN: usize = 40;
const DEFAULT_CONCURRENCY: usize = 5;

static KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)reduces|improves|increases|lowers|risk|mortality|biomarker|studies?\s+show|clinical\s+trial|proven").unwrap()
});

/// Split `text` on runs of `.`/`!`/`?` terminators, keeping the terminator(s)
/// attached to the sentence that precedes them. The `regex` crate has no
/// look-around support, so this walks the byte stream by hand instead of
/// using a look-behind split pattern; all split points sit immediately after
/// an ASCII byte, which is always a valid UTF-8 char boundary.
fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut end = i + 1;
            while end < bytes.len() && matches!(bytes[end], b'.' | b'!' | b'?') {
                end += 1;
            }
            sentences.push(&text[start..end]);
            let mut next = end;
            while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                next += 1;
            }
            start = next;
            i = next;
        } else {
            i += 1;
        }
    }
    if start < bytes.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Split `text` into claim-worthy sentences: length >= 40 and containing at
/// least one of the fixed keyword/phrase markers.
pub fn extract_claims(text: &str, turn_index: u32, speaker: Speaker) -> Vec<Claim> {
    let sentences: Vec<&str> = split_sentences(text.trim())
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut claims = Vec::new();
    for (i, sentence) in sentences.iter().enumerate() {
        if sentence.len() < MIN_CLAIM_LEN || !KEYWORDS.is_match(sentence) {
            continue;
        }
        claims.push(Claim {
            text: sentence.to_string(),
            turn_index,
            speaker,
            context_before: i.checked_sub(1).map(|j| sentences[j].to_string()),
            context_after: sentences.get(i + 1).map(|s| s.to_string()),
        });
    }
    claims
}

#[derive(Debug, Serialize)]
struct ClaimPayload<'a> {
    text: &'a str,
    context: Option<&'a str>,
    turn_index: u32,
    speaker: &'static str,
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    mode: &'static str,
    claims: Vec<ClaimPayload<'a>>,
}

#[derive(Debug, Deserialize)]
struct ValidationItem {
    #[serde(default)]
    validity: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValidateResponse {
    Array(Vec<ValidationItem>),
    Wrapped { results: Vec<ValidationItem> },
}

impl ValidateResponse {
    fn into_items(self) -> Vec<ValidationItem> {
        match self {
            ValidateResponse::Array(items) => items,
            ValidateResponse::Wrapped { results } => results,
        }
    }
}

/// The global concurrency bound shared by every validator call in the
/// process, matching the single bounded semaphore the original tool layer
/// used (reinitialized with [`set_tool_concurrency_limit`] if needed).
static TOOL_SEMAPHORE: Lazy<std::sync::Mutex<Arc<Semaphore>>> =
    Lazy::new(|| std::sync::Mutex::new(Arc::new(Semaphore::new(DEFAULT_CONCURRENCY))));

pub fn set_tool_concurrency_limit(n: usize) {
    *TOOL_SEMAPHORE.lock().expect("semaphore lock poisoned") = Arc::new(Semaphore::new(n.max(1)));
}

fn current_semaphore() -> Arc<Semaphore> {
    TOOL_SEMAPHORE.lock().expect("semaphore lock poisoned").clone()
}

fn server_unavailable(claims: &[Claim]) -> Vec<ClaimValidation> {
    claims
        .iter()
        .map(|c| ClaimValidation {
            claim: c.clone(),
            validity: Validity::Unknown,
            confidence: 0.0,
            evidence: None,
            server_unavailable: true,
            raw_response: None,
        })
        .collect()
}

/// POST claims to the validator with up to `max_retries` additional attempts
/// and 0.5*(attempt+1)s linear backoff between them. Returns `None` only
/// after every attempt has failed.
async fn post_with_retries(
    client: &reqwest::Client,
    url: &str,
    body: &ValidateRequest<'_>,
    timeout: Duration,
    max_retries: u32,
) -> Option<ValidateResponse> {
    for attempt in 0..=max_retries {
        let send = client.post(url).json(body).timeout(timeout).send().await;
        match send {
            Ok(resp) if resp.status().is_success() => match resp.json::<ValidateResponse>().await {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!("validator response parse failure: {e}"),
            },
            Ok(resp) => warn!("validator returned status {}", resp.status()),
            Err(e) => warn!("validator transport error: {e}"),
        }
        if attempt < max_retries {
            tokio::time::sleep(Duration::from_secs_f64(0.5 * (attempt as f64 + 1.0))).await;
        }
    }
    None
}

/// Validate `claims` in one batch request. On any unrecoverable failure,
/// every claim degrades to `unknown` + `server_unavailable = true` rather
/// than failing the run.
pub async fn validate_claims(
    claims: &[Claim],
    url: &str,
    timeout: Duration,
    max_retries: u32,
) -> Vec<ClaimValidation> {
    if claims.is_empty() {
        return Vec::new();
    }

    let client = reqwest::Client::new();
    let payloads: Vec<ClaimPayload> = claims
        .iter()
        .map(|c| ClaimPayload {
            text: &c.text,
            context: c.context_before.as_deref(),
            turn_index: c.turn_index,
            speaker: match c.speaker {
                Speaker::Advocate => "advocate",
                Speaker::Planner => "planner",
            },
        })
        .collect();
    let request = ValidateRequest {
        mode: "batch",
        claims: payloads,
    };

    let Some(response) = post_with_retries(&client, url, &request, timeout, max_retries).await
    else {
        return server_unavailable(claims);
    };

    let mut items = response.into_items();
    while items.len() < claims.len() {
        items.push(ValidationItem {
            validity: None,
            confidence: None,
            evidence: None,
        });
    }

    claims
        .iter()
        .zip(items)
        .map(|(claim, item)| ClaimValidation {
            claim: claim.clone(),
            validity: item
                .validity
                .as_deref()
                .map(Validity::from_wire)
                .unwrap_or(Validity::Unknown),
            confidence: item.confidence.unwrap_or(0.0),
            evidence: item.evidence,
            server_unavailable: false,
            raw_response: None,
        })
        .collect()
}

/// Acquire the global validator concurrency permit before calling
/// [`validate_claims`]. On repeated acquisition timeouts, falls back to one
/// best-effort call that bypasses the semaphore entirely rather than
/// blocking the caller indefinitely — see SPEC_FULL.md §9.
pub async fn concurrency_limited_validate_claims(
    claims: &[Claim],
    url: &str,
    timeout: Duration,
    max_retries: u32,
) -> Vec<ClaimValidation> {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
    const BACKOFF_BASE: f64 = 0.25;

    for attempt in 0..=max_retries {
        let semaphore = current_semaphore();
        match tokio::time::timeout(ACQUIRE_TIMEOUT, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => {
                let result = validate_claims(claims, url, timeout, max_retries).await;
                drop(permit);
                return result;
            }
            _ => {
                debug!("validator semaphore acquisition timed out on attempt {attempt}");
                tokio::time::sleep(Duration::from_secs_f64(BACKOFF_BASE * (attempt as f64 + 1.0)))
                    .await;
            }
        }
    }

    warn!("validator concurrency limit exhausted, bypassing semaphore for one best-effort call");
    validate_claims(claims, url, timeout, 0).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentences_keeps_terminator_with_preceding_sentence() {
        let out = split_sentences("Hi there. How are you? Fine!");
        assert_eq!(out, vec!["Hi there.", "How are you?", "Fine!"]);
    }

    #[test]
    fn split_sentences_handles_multibyte_text() {
        let out = split_sentences("Café visit. Déjà vu moment!");
        assert_eq!(out, vec!["Café visit.", "Déjà vu moment!"]);
    }

    #[test]
    fn extracts_single_matching_sentence() {
        let text = "Post-meal walks reduce mortality risk in some studies show benefits for metabolic health overall.";
        let claims = extract_claims(text, 2, Speaker::Planner);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].text, text);
        assert_eq!(claims[0].turn_index, 2);
        assert_eq!(claims[0].speaker, Speaker::Planner);
    }

    #[test]
    fn skips_short_sentences_and_sentences_without_keywords() {
        let text = "Hi there. The weather is nice today in the city.";
        assert!(extract_claims(text, 0, Speaker::Advocate).is_empty());
    }

    #[test]
    fn server_unavailable_marks_all_claims_unknown() {
        let claims = vec![Claim {
            text: "Regular exercise reduces cardiovascular risk according to clinical trial data."
                .to_string(),
            turn_index: 0,
            speaker: Speaker::Planner,
            context_before: None,
            context_after: None,
        }];
        let validations = server_unavailable(&claims);
        assert_eq!(validations.len(), 1);
        assert_eq!(validations[0].validity, Validity::Unknown);
        assert_eq!(validations[0].confidence, 0.0);
        assert!(validations[0].server_unavailable);
    }

    #[tokio::test]
    async fn unreachable_url_degrades_to_unknown() {
        let claims = vec![Claim {
            text: "Regular strength training reduces fall risk and improves biomarker profiles."
                .to_string(),
            turn_index: 1,
            speaker: Speaker::Planner,
            context_before: None,
            context_after: None,
        }];
        let out = validate_claims(
            &claims,
            "http://127.0.0.1:1/unreachable",
            Duration::from_millis(200),
            1,
        )
        .await;
        assert_eq!(out.len(), 1);
        assert!(out[0].server_unavailable);
        assert_eq!(out[0].validity, Validity::Unknown);
    }
}
