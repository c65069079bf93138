//! Domain handlers: skill analysis, recommendations, problem matching.
//!
//! The gateway owns only the envelope contract for these: each handler
//! parses its own typed request from `data`, delegates to the
//! [`DomainService`] collaborator, and wraps the result in a success
//! envelope. The algorithms behind the trait are out of scope here;
//! [`StaticDomainService`] returns deterministic placeholder results.

use crate::dispatch::HandlerRegistry;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use wsgate_core::envelope::codes;
use wsgate_core::{GateResult, ResponseEnvelope};

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeSkillRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "solvedProblems", default)]
    pub solved_problems: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillReport {
    pub level: String,
    pub score: f64,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    #[serde(rename = "problemId")]
    pub problem_id: String,
    pub title: String,
    pub difficulty: String,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchProblemsRequest {
    #[serde(rename = "problemId", default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemMatch {
    #[serde(rename = "problemId")]
    pub problem_id: String,
    pub title: String,
    pub similarity: f64,
}

fn default_limit() -> usize {
    5
}

/// External collaborator implementing the domain algorithms.
pub trait DomainService: Send + Sync {
    fn analyze_skill(&self, req: AnalyzeSkillRequest) -> BoxFuture<'static, GateResult<SkillReport>>;
    fn recommend(
        &self,
        req: RecommendationRequest,
    ) -> BoxFuture<'static, GateResult<Vec<Recommendation>>>;
    fn match_problems(
        &self,
        req: MatchProblemsRequest,
    ) -> BoxFuture<'static, GateResult<Vec<ProblemMatch>>>;
}

/// Deterministic in-process service. Stands in for the real analysis
/// backend; results depend only on the request.
#[derive(Default)]
pub struct StaticDomainService;

impl DomainService for StaticDomainService {
    fn analyze_skill(&self, req: AnalyzeSkillRequest) -> BoxFuture<'static, GateResult<SkillReport>> {
        Box::pin(async move {
            let solved = req.solved_problems.len();
            let level = match solved {
                0..=4 => "beginner",
                5..=19 => "intermediate",
                _ => "advanced",
            };
            Ok(SkillReport {
                level: level.to_string(),
                score: (solved as f64 * 7.5).min(100.0),
                strengths: req.solved_problems.iter().take(3).cloned().collect(),
                gaps: Vec::new(),
            })
        })
    }

    fn recommend(
        &self,
        req: RecommendationRequest,
    ) -> BoxFuture<'static, GateResult<Vec<Recommendation>>> {
        Box::pin(async move {
            let topics = if req.topics.is_empty() {
                vec!["general".to_string()]
            } else {
                req.topics
            };
            Ok(topics
                .iter()
                .cycle()
                .take(req.limit)
                .enumerate()
                .map(|(i, topic)| Recommendation {
                    problem_id: format!("{topic}-{}", i + 1),
                    title: format!("Practice problem {} for {topic}", i + 1),
                    difficulty: "medium".to_string(),
                    reason: format!("matches requested topic {topic}"),
                })
                .collect())
        })
    }

    fn match_problems(
        &self,
        req: MatchProblemsRequest,
    ) -> BoxFuture<'static, GateResult<Vec<ProblemMatch>>> {
        Box::pin(async move {
            let seed = req
                .problem_id
                .or(req.query)
                .unwrap_or_else(|| "unspecified".to_string());
            Ok((0..req.limit)
                .map(|i| ProblemMatch {
                    problem_id: format!("{seed}-similar-{}", i + 1),
                    title: format!("Problems similar to {seed} #{}", i + 1),
                    similarity: 1.0 - (i as f64) * 0.1,
                })
                .collect())
        })
    }
}

/// Register the three domain handlers against `service`.
pub fn register_domain_handlers(handlers: &mut HandlerRegistry, service: Arc<dyn DomainService>) {
    let analyze = service.clone();
    handlers.register("analyze-skill", move |_ctx, env| {
        let service = analyze.clone();
        Box::pin(async move {
            let request_id = env.id.clone();
            let req = match serde_json::from_value(env.data) {
                Ok(req) => req,
                Err(e) => return Ok(bad_payload(request_id, "analyze-skill", e)),
            };
            let report = service.analyze_skill(req).await?;
            Ok(ResponseEnvelope::success(
                request_id,
                "skill-analysis",
                serde_json::to_value(report)?,
            ))
        })
    });

    let recommend = service.clone();
    handlers.register("get-recommendations", move |_ctx, env| {
        let service = recommend.clone();
        Box::pin(async move {
            let request_id = env.id.clone();
            let req = match serde_json::from_value(env.data) {
                Ok(req) => req,
                Err(e) => return Ok(bad_payload(request_id, "get-recommendations", e)),
            };
            let recommendations = service.recommend(req).await?;
            Ok(ResponseEnvelope::success(
                request_id,
                "recommendations",
                json!({"recommendations": recommendations}),
            ))
        })
    });

    handlers.register("match-problems", move |_ctx, env| {
        let service = service.clone();
        Box::pin(async move {
            let request_id = env.id.clone();
            let req = match serde_json::from_value(env.data) {
                Ok(req) => req,
                Err(e) => return Ok(bad_payload(request_id, "match-problems", e)),
            };
            let matches = service.match_problems(req).await?;
            Ok(ResponseEnvelope::success(
                request_id,
                "problem-matches",
                json!({"matches": matches}),
            ))
        })
    });
}

fn bad_payload(
    request_id: Option<String>,
    msg_type: &str,
    e: serde_json::Error,
) -> ResponseEnvelope {
    ResponseEnvelope::failure(
        request_id,
        codes::INVALID_FORMAT,
        format!("{msg_type} payload invalid: {e}"),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::registry::ClientRegistry;
    use serde_json::json;
    use wsgate_core::Envelope;

    fn dispatcher() -> Dispatcher {
        let mut handlers = HandlerRegistry::new();
        register_domain_handlers(&mut handlers, Arc::new(StaticDomainService));
        Dispatcher::new(handlers, Arc::new(ClientRegistry::new()))
    }

    fn envelope(id: &str, msg_type: &str, data: serde_json::Value) -> Envelope {
        Envelope {
            id: Some(id.to_string()),
            msg_type: msg_type.to_string(),
            timestamp: None,
            data,
        }
    }

    #[tokio::test]
    async fn analyze_skill_round_trips_request_id() {
        let d = dispatcher();
        let resp = d
            .dispatch(
                "c1",
                envelope(
                    "a1",
                    "analyze-skill",
                    json!({"userId": "u1", "solvedProblems": ["p1", "p2", "p3", "p4", "p5", "p6"]}),
                ),
            )
            .await;
        assert_eq!(resp.id.as_deref(), Some("a1"));
        assert_eq!(resp.msg_type, "skill-analysis");
        let data = resp.data.unwrap();
        assert_eq!(data["level"], "intermediate");
        assert_eq!(data["score"], 45.0);
    }

    #[tokio::test]
    async fn recommendations_honor_limit() {
        let d = dispatcher();
        let resp = d
            .dispatch(
                "c1",
                envelope("r1", "get-recommendations", json!({"topics": ["graphs"], "limit": 2})),
            )
            .await;
        assert_eq!(resp.msg_type, "recommendations");
        let recs = resp.data.unwrap()["recommendations"].as_array().unwrap().len();
        assert_eq!(recs, 2);
    }

    #[tokio::test]
    async fn match_problems_defaults() {
        let d = dispatcher();
        let resp = d
            .dispatch("c1", envelope("m1", "match-problems", json!({"problemId": "p42"})))
            .await;
        assert_eq!(resp.msg_type, "problem-matches");
        let matches = resp.data.unwrap()["matches"].as_array().unwrap().len();
        assert_eq!(matches, 5);
    }

    #[tokio::test]
    async fn malformed_domain_payload_is_soft() {
        let d = dispatcher();
        let resp = d
            .dispatch("c1", envelope("x1", "analyze-skill", json!({"solvedProblems": "nope"})))
            .await;
        assert_eq!(resp.id.as_deref(), Some("x1"));
        assert_eq!(resp.error.unwrap().code, codes::INVALID_FORMAT);
    }
}
