use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::config::SelectorParams;
use crate::engine::difficulty::DifficultyMatrix;
use crate::engine::error::{EngineError, RepositoryError};
use crate::engine::types::{Grade, ProblemDescriptor, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemQuery {
    pub grade: Grade,
    pub tier: Tier,
    pub subject: String,
    pub difficulty_min: f64,
    pub difficulty_max: f64,
    #[serde(default)]
    pub exclude_ids: Vec<String>,
}

/// External source of problem metadata.
#[async_trait]
pub trait ProblemRepository: Send + Sync {
    async fn query(&self, query: &ProblemQuery) -> Result<Vec<ProblemDescriptor>, RepositoryError>;
}

/// Repository over a fixed problem list. Used by the replay binary and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProblemRepository {
    problems: Vec<ProblemDescriptor>,
    latency: Option<Duration>,
    unavailable: bool,
}

impl InMemoryProblemRepository {
    pub fn new(problems: Vec<ProblemDescriptor>) -> Self {
        Self {
            problems,
            ..Default::default()
        }
    }

    /// Loads a JSON array of problem descriptors.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::Unavailable(format!("{}: {e}", path.display())))?;
        let problems: Vec<ProblemDescriptor> = serde_json::from_str(&raw)
            .map_err(|e| RepositoryError::Rejected(format!("{}: {e}", path.display())))?;
        Ok(Self::new(problems))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

#[async_trait]
impl ProblemRepository for InMemoryProblemRepository {
    async fn query(&self, query: &ProblemQuery) -> Result<Vec<ProblemDescriptor>, RepositoryError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable {
            return Err(RepositoryError::Unavailable("in-memory repository offline".into()));
        }
        Ok(self
            .problems
            .iter()
            .filter(|p| p.difficulty >= query.difficulty_min && p.difficulty <= query.difficulty_max)
            .filter(|p| !query.exclude_ids.contains(&p.id))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub grade: Grade,
    pub tier: Tier,
    pub subject: String,
    pub target: f64,
    #[serde(default)]
    pub exclude_ids: Vec<String>,
    /// 0 returns every candidate.
    #[serde(default)]
    pub limit: usize,
}

/// Per-learner record of when problems were last served, bounded by evicting
/// the oldest entry.
#[derive(Debug, Default, Clone)]
pub struct ServedRecency {
    served_at: HashMap<String, i64>,
    capacity: usize,
}

impl ServedRecency {
    pub fn new(capacity: usize) -> Self {
        Self {
            served_at: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn mark(&mut self, id: &str, now_ms: i64) {
        self.served_at.insert(id.to_string(), now_ms);
        while self.served_at.len() > self.capacity {
            let oldest = self
                .served_at
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.served_at.remove(&id);
                }
                None => break,
            }
        }
    }

    pub fn last_served(&self, id: &str) -> Option<i64> {
        self.served_at.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.served_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.served_at.is_empty()
    }
}

/// Adapter over a [`ProblemRepository`]: windowed query with a timeout, topic
/// filtering from the difficulty matrix and closeness/recency ordering.
pub struct ProblemSelector {
    repository: Arc<dyn ProblemRepository>,
    matrix: Arc<DifficultyMatrix>,
    params: SelectorParams,
}

impl ProblemSelector {
    pub fn new(
        repository: Arc<dyn ProblemRepository>,
        matrix: Arc<DifficultyMatrix>,
        params: SelectorParams,
    ) -> Self {
        Self {
            repository,
            matrix,
            params,
        }
    }

    /// Empty recency sized by the selector parameters, one per learner session.
    pub fn new_recency(&self) -> ServedRecency {
        ServedRecency::new(self.params.recency_capacity)
    }

    pub fn query_for(&self, request: &SelectionRequest) -> Result<ProblemQuery, EngineError> {
        let entry = self.matrix.get(request.grade, request.tier)?;
        let half = self.params.window_half_width.max(0.0);
        let lo = (request.target - half).clamp(entry.min, entry.max);
        let hi = (request.target + half).clamp(entry.min, entry.max);
        Ok(ProblemQuery {
            grade: request.grade,
            tier: request.tier,
            subject: request.subject.clone(),
            difficulty_min: lo.min(hi),
            difficulty_max: hi.max(lo),
            exclude_ids: request.exclude_ids.clone(),
        })
    }

    /// Candidates ordered by distance to the target, never-served first, then
    /// least recently served according to the caller's `recency`. An empty result is `NoAvailableContent`; the window
    /// is never widened here.
    pub async fn select(
        &self,
        request: &SelectionRequest,
        recency: &ServedRecency,
    ) -> Result<Vec<ProblemDescriptor>, EngineError> {
        let entry = self.matrix.get(request.grade, request.tier)?.clone();
        let query = self.query_for(request)?;
        let timeout = Duration::from_millis(self.params.timeout_ms);

        let fetched = match tokio::time::timeout(timeout, self.repository.query(&query)).await {
            Ok(Ok(problems)) => problems,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, grade = %query.grade, tier = %query.tier, "problem repository failed");
                return Err(EngineError::NoAvailableContent {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.params.timeout_ms,
                    grade = %query.grade,
                    tier = %query.tier,
                    "problem repository timed out"
                );
                return Err(EngineError::NoAvailableContent {
                    reason: format!("repository timed out after {}ms", self.params.timeout_ms),
                });
            }
        };

        let mut candidates: Vec<(ProblemDescriptor, Option<i64>)> = fetched
            .into_iter()
            .filter(|p| !query.exclude_ids.contains(&p.id))
            .filter(|p| entry.permits_topic(&p.topic))
            .map(|p| {
                let served = recency.last_served(&p.id);
                (p, served)
            })
            .collect();

        if candidates.is_empty() {
            return Err(EngineError::NoAvailableContent {
                reason: format!(
                    "no {} problems for {}/{} in [{:.1}, {:.1}]",
                    query.subject, query.grade, query.tier, query.difficulty_min, query.difficulty_max
                ),
            });
        }

        let target = request.target;
        candidates.sort_by(|(a, a_served), (b, b_served)| {
            let da = (a.difficulty - target).abs();
            let db = (b.difficulty - target).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match (a_served, b_served) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(y),
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut problems: Vec<ProblemDescriptor> = candidates.into_iter().map(|(p, _)| p).collect();
        if request.limit > 0 {
            problems.truncate(request.limit);
        }
        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(id: &str, difficulty: f64, topic: &str) -> ProblemDescriptor {
        ProblemDescriptor {
            id: id.to_string(),
            difficulty,
            topic: topic.to_string(),
            subtopic: None,
            expected_time_secs: 120,
            required_skills: vec![],
        }
    }

    fn selector(repo: InMemoryProblemRepository) -> ProblemSelector {
        ProblemSelector::new(
            Arc::new(repo),
            Arc::new(DifficultyMatrix::builtin().unwrap()),
            SelectorParams::default(),
        )
    }

    fn request(target: f64) -> SelectionRequest {
        SelectionRequest {
            grade: Grade::Fifth,
            tier: Tier::Standard,
            subject: "math".into(),
            target,
            exclude_ids: vec![],
            limit: 0,
        }
    }

    #[tokio::test]
    async fn empty_repository_is_no_available_content() {
        let s = selector(InMemoryProblemRepository::default());
        let err = s
            .select(&request(4.5), &ServedRecency::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoAvailableContent { .. }));
    }

    #[tokio::test]
    async fn candidates_sorted_by_closeness_then_recency() {
        let s = selector(InMemoryProblemRepository::new(vec![
            problem("far", 4.9, "fractions"),
            problem("near-a", 4.5, "fractions"),
            problem("near-b", 4.5, "fractions"),
        ]));
        let mut recency = s.new_recency();
        recency.mark("near-a", 1_000);

        let got = s.select(&request(4.5), &recency).await.unwrap();
        let ids: Vec<_> = got.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["near-b", "near-a", "far"]);
    }

    #[tokio::test]
    async fn forbidden_topics_are_dropped() {
        let s = selector(InMemoryProblemRepository::new(vec![problem(
            "p1",
            4.5,
            "competition_combinatorics",
        )]));
        assert!(s
            .select(&request(4.5), &ServedRecency::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn slow_repository_times_out() {
        let repo = InMemoryProblemRepository::new(vec![problem("p1", 4.5, "fractions")])
            .with_latency(Duration::from_millis(500));
        let s = ProblemSelector::new(
            Arc::new(repo),
            Arc::new(DifficultyMatrix::builtin().unwrap()),
            SelectorParams {
                timeout_ms: 20,
                ..Default::default()
            },
        );
        let err = s
            .select(&request(4.5), &ServedRecency::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn window_stays_inside_matrix_bounds() {
        let s = selector(InMemoryProblemRepository::default());
        let q = s.query_for(&request(6.0)).unwrap();
        assert_eq!(q.difficulty_max, 6.0);
        assert_eq!(q.difficulty_min, 5.5);
    }

    #[test]
    fn recency_is_bounded() {
        let mut r = ServedRecency::new(2);
        r.mark("a", 1);
        r.mark("b", 2);
        r.mark("c", 3);
        assert_eq!(r.last_served("a"), None);
        assert_eq!(r.last_served("c"), Some(3));
        assert_eq!(r.len(), 2);
    }

    #[tokio::test]
    async fn recency_only_affects_its_own_caller() {
        let s = selector(InMemoryProblemRepository::new(vec![
            problem("a", 4.5, "fractions"),
            problem("b", 4.5, "fractions"),
        ]));
        let mut served = s.new_recency();
        served.mark("a", 1_000);
        let fresh = s.new_recency();

        let ids = |got: Vec<ProblemDescriptor>| got.into_iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(ids(s.select(&request(4.5), &fresh).await.unwrap()), vec!["a", "b"]);
        assert_eq!(ids(s.select(&request(4.5), &served).await.unwrap()), vec!["b", "a"]);
    }
}
