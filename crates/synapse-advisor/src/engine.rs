//! Reuse/adapt/create decision engine.
//!
//! Given a free-text intent, the engine ranks registry entities by a
//! TF-IDF weighted keyword score blended with a purpose-token overlap,
//! walks the usage graph to estimate blast radius, and recommends one of:
//!
//! - **REUSE**: the intent is already covered (relevance ≥ 0.9).
//! - **ADAPT**: a close match exists (0.6 ≤ relevance < 0.9) that is
//!   adaptable enough (score ≥ 0.6) and not too widely consumed
//!   (impact < 30% of the registry).
//! - **CREATE**: nothing qualifies; the decision carries a justification
//!   that is archived with the new entity and reviewed after 30 days.
//!
//! Analysis results and the IDF table are cached for five minutes; the IDF
//! cache key tracks registry state so any committed batch invalidates it.

use crate::cache::TtlCache;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_registry::analysis::extract_keywords;
use synapse_registry::{CreateJustification, Entity, Registry, RegistryDocument};

/// Tunables for scoring and the decision matrix.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Candidates below this relevance are dropped outright.
    pub relevance_threshold: f64,
    /// Relevance at or above this is a REUSE.
    pub reuse_threshold: f64,
    /// Lower edge of the ADAPT band.
    pub adapt_min_relevance: f64,
    /// Minimum adaptability score for ADAPT.
    pub adapt_min_score: f64,
    /// ADAPT is off the table at or above this share of the registry.
    pub adapt_impact_threshold: f64,
    /// ADAPT confidence is high at or above this relevance.
    pub adapt_high_confidence: f64,
    pub keyword_weight: f64,
    pub purpose_weight: f64,
    /// Recommendations returned at most.
    pub max_results: usize,
    /// TTL for the analysis and IDF caches.
    pub cache_ttl: Duration,
    /// CREATE decisions are reviewed this many days out.
    pub create_review_days: i64,
    /// Consumers needed to call a created entity a promotion candidate.
    pub promotion_min_used_by: usize,
    /// Unused created entities older than this go to deprecation review.
    pub deprecation_age_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.4,
            reuse_threshold: 0.9,
            adapt_min_relevance: 0.6,
            adapt_min_score: 0.6,
            adapt_impact_threshold: 0.30,
            adapt_high_confidence: 0.8,
            keyword_weight: 0.6,
            purpose_weight: 0.4,
            max_results: 20,
            cache_ttl: Duration::from_secs(300),
            create_review_days: 30,
            promotion_min_used_by: 3,
            deprecation_age_days: 60,
        }
    }
}

/// Optional narrowing of an analysis to a type or category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl AnalysisContext {
    pub fn of_type(artifact_type: &str) -> Self {
        Self {
            artifact_type: Some(artifact_type.to_string()),
            category: None,
        }
    }
}

/// The three possible top-level decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Reuse,
    Adapt,
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Transitive consumer set of an entity, as a share of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub affected: Vec<String>,
    pub count: usize,
    pub percentage: f64,
}

/// One ranked recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub entity_id: String,
    pub entity_path: String,
    pub entity_type: String,
    pub entity_purpose: String,
    pub relevance_score: f64,
    pub keyword_score: f64,
    pub purpose_score: f64,
    pub decision: Decision,
    pub confidence: Confidence,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation_impact: Option<ImpactAnalysis>,
}

/// Roll-up of the top recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub decision: Decision,
    pub confidence: Confidence,
    pub total_candidates: usize,
    pub considered: usize,
}

/// Full result of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub recommendations: Vec<Recommendation>,
    pub summary: AnalysisSummary,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<CreateJustification>,
}

/// Promotion classification for entities born from CREATE decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionStatus {
    PromotionCandidate,
    Monitoring,
    DeprecationReview,
}

/// Review line for one created entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReview {
    pub entity_id: String,
    pub status: PromotionStatus,
    pub used_by_count: usize,
    pub days_since_creation: i64,
}

/// Seam for gates: anything that can analyze an intent.
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    async fn analyze_intent(
        &self,
        intent: &str,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult>;
}

struct IdfTable {
    state_key: String,
    computed_at: Instant,
    idf: HashMap<String, f64>,
    /// `ln(N) + 1`: the weight of a keyword no entity carries.
    default_idf: f64,
}

/// The decision engine itself. Pure CPU plus registry snapshots; no
/// suspension points.
pub struct DecisionEngine {
    registry: Arc<Registry>,
    config: EngineConfig,
    analysis_cache: TtlCache<AnalysisResult>,
    idf_cache: parking_lot::Mutex<Option<IdfTable>>,
}

impl DecisionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: EngineConfig) -> Self {
        let cache_ttl = config.cache_ttl;
        Self {
            registry,
            config,
            analysis_cache: TtlCache::new(cache_ttl),
            idf_cache: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop both caches.
    pub fn clear_cache(&self) {
        self.analysis_cache.clear();
        *self.idf_cache.lock() = None;
    }

    /// Rank registry entities against an intent and decide.
    pub fn analyze(&self, intent: &str, context: &AnalysisContext) -> Result<AnalysisResult> {
        let cache_key = format!(
            "{}|{}",
            intent.trim().to_lowercase(),
            serde_json::to_string(context)?
        );
        if let Some(hit) = self.analysis_cache.get(&cache_key) {
            return Ok(hit);
        }

        let doc = self.registry.snapshot();
        let total = doc.entity_count();
        let mut warnings = Vec::new();
        if total == 0 {
            warnings.push("registry is empty; no reuse candidates exist".to_string());
        }

        let intent_keywords = extract_keywords(intent);
        let intent_tokens = purpose_tokens(intent);
        let (idf, default_idf) = self.idf_table(&doc);

        let candidates: Vec<&Entity> = doc
            .all_entities()
            .filter(|e| {
                context
                    .artifact_type
                    .as_ref()
                    .map(|t| &e.artifact_type == t)
                    .unwrap_or(true)
                    && context
                        .category
                        .as_ref()
                        .map(|c| e.category.as_str() == c)
                        .unwrap_or(true)
            })
            .collect();
        let considered = candidates.len();

        let mut scored: Vec<Recommendation> = candidates
            .into_iter()
            .filter_map(|entity| {
                let keyword_score =
                    keyword_overlap(&intent_keywords, &entity.keywords, &idf, default_idf);
                let purpose_score = purpose_overlap(&intent_tokens, &purpose_tokens(&entity.purpose));
                let relevance = self.config.keyword_weight * keyword_score
                    + self.config.purpose_weight * purpose_score;
                if relevance < self.config.relevance_threshold {
                    return None;
                }
                Some(self.recommend(entity, &doc, relevance, keyword_score, purpose_score, total))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.max_results);

        let (decision, confidence) = scored
            .first()
            .map(|top| (top.decision, top.confidence))
            .unwrap_or((Decision::Create, Confidence::Low));

        let justification = if decision == Decision::Create {
            Some(self.build_justification(intent, &scored, &doc, total))
        } else {
            None
        };

        let rationale = scored
            .first()
            .map(|top| top.rationale.clone())
            .unwrap_or_else(|| "no candidate reached the relevance floor".to_string());

        let result = AnalysisResult {
            summary: AnalysisSummary {
                decision,
                confidence,
                total_candidates: total,
                considered,
            },
            recommendations: scored,
            rationale,
            warnings,
            justification,
        };

        self.analysis_cache.insert(cache_key, result.clone());
        Ok(result)
    }

    /// Classify every entity that was born from a CREATE decision.
    pub fn review_create_decisions(&self) -> Vec<PromotionReview> {
        let doc = self.registry.snapshot();
        doc.all_entities()
            .filter(|e| e.create_justification.is_some())
            .map(|e| self.promotion_review(e))
            .collect()
    }

    /// Promotion classification for one entity.
    pub fn get_promotion_status(&self, entity: &Entity) -> PromotionStatus {
        self.promotion_review(entity).status
    }

    fn promotion_review(&self, entity: &Entity) -> PromotionReview {
        let used_by_count = entity.used_by.len();
        // The justification's review date is creation + review window, so
        // creation falls out of it without a dedicated field.
        let created = entity
            .create_justification
            .as_ref()
            .map(|j| j.review_scheduled - ChronoDuration::days(self.config.create_review_days))
            .unwrap_or(entity.last_verified);
        let days_since_creation = (Utc::now() - created).num_days();

        let status = if used_by_count >= self.config.promotion_min_used_by {
            PromotionStatus::PromotionCandidate
        } else if used_by_count == 0 && days_since_creation > self.config.deprecation_age_days {
            PromotionStatus::DeprecationReview
        } else {
            PromotionStatus::Monitoring
        };

        PromotionReview {
            entity_id: entity.id.clone(),
            status,
            used_by_count,
            days_since_creation,
        }
    }

    fn recommend(
        &self,
        entity: &Entity,
        doc: &RegistryDocument,
        relevance: f64,
        keyword_score: f64,
        purpose_score: f64,
        total: usize,
    ) -> Recommendation {
        let config = &self.config;
        let impact = impact_analysis(entity, doc, total);

        let (decision, confidence, rationale, adaptation_impact) =
            if relevance >= config.reuse_threshold {
                (
                    Decision::Reuse,
                    Confidence::High,
                    format!(
                        "relevance {:.3} meets the reuse threshold; use {} as-is",
                        round3(relevance),
                        entity.id
                    ),
                    None,
                )
            } else if relevance >= config.adapt_min_relevance
                && entity.adaptability.score >= config.adapt_min_score
                && impact.percentage < config.adapt_impact_threshold
            {
                let confidence = if relevance >= config.adapt_high_confidence {
                    Confidence::High
                } else {
                    Confidence::Medium
                };
                (
                    Decision::Adapt,
                    confidence,
                    format!(
                        "relevance {:.3} in the adapt band; adaptability {:.2}, downstream impact {:.1}%",
                        round3(relevance),
                        entity.adaptability.score,
                        impact.percentage * 100.0
                    ),
                    Some(impact.clone()),
                )
            } else {
                let reasons = rejection_reasons_for(entity, relevance, &impact, config);
                let confidence = if relevance >= config.adapt_min_relevance {
                    Confidence::Medium
                } else {
                    Confidence::Low
                };
                (
                    Decision::Create,
                    confidence,
                    format!("create new capability: {}", reasons.join("; ")),
                    None,
                )
            };

        Recommendation {
            entity_id: entity.id.clone(),
            entity_path: entity.path.clone(),
            entity_type: entity.artifact_type.clone(),
            entity_purpose: entity.purpose.clone(),
            relevance_score: round3(relevance),
            keyword_score: round3(keyword_score),
            purpose_score: round3(purpose_score),
            decision,
            confidence,
            rationale,
            adaptation_impact: adaptation_impact.map(|mut impact| {
                impact.percentage = round3(impact.percentage);
                impact
            }),
        }
    }

    fn build_justification(
        &self,
        intent: &str,
        recommendations: &[Recommendation],
        doc: &RegistryDocument,
        total: usize,
    ) -> CreateJustification {
        let evaluated: Vec<&Recommendation> = recommendations.iter().take(5).collect();
        let mut rejection_reasons = BTreeMap::new();
        for rec in &evaluated {
            // Every evaluated pattern gets a genuine rejection reason, even
            // when its own per-entity decision was ADAPT: it still lost to
            // CREATE because it never reached the reuse bar.
            let reason = match doc.find(&rec.entity_id) {
                Some(entity) => {
                    let impact = impact_analysis(entity, doc, total);
                    rejection_reasons_for(entity, rec.relevance_score, &impact, &self.config)
                        .join("; ")
                }
                None => format!(
                    "relevance {:.3} below the reuse threshold {:.2}",
                    rec.relevance_score, self.config.reuse_threshold
                ),
            };
            rejection_reasons.insert(rec.entity_id.clone(), reason);
        }
        CreateJustification {
            evaluated_patterns: evaluated.iter().map(|r| r.entity_id.clone()).collect(),
            rejection_reasons,
            new_capability: intent.trim().to_string(),
            review_scheduled: Utc::now() + ChronoDuration::days(self.config.create_review_days),
        }
    }

    /// IDF table over the whole registry, cached against registry state.
    fn idf_table(&self, doc: &RegistryDocument) -> (HashMap<String, f64>, f64) {
        let state_key = format!(
            "{}-{}",
            doc.entity_count(),
            doc.metadata.last_updated.timestamp_millis()
        );

        let mut cached = self.idf_cache.lock();
        if let Some(table) = cached.as_ref() {
            if table.state_key == state_key && table.computed_at.elapsed() < self.config.cache_ttl {
                return (table.idf.clone(), table.default_idf);
            }
        }

        let n = doc.entity_count();
        let mut df: HashMap<String, usize> = HashMap::new();
        for entity in doc.all_entities() {
            for keyword in &entity.keywords {
                *df.entry(keyword.clone()).or_insert(0) += 1;
            }
        }
        let idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(keyword, df)| {
                let idf = ((n as f64) / (df.max(1) as f64)).ln() + 1.0;
                (keyword, idf)
            })
            .collect();
        let default_idf = (n.max(1) as f64).ln() + 1.0;

        *cached = Some(IdfTable {
            state_key,
            computed_at: Instant::now(),
            idf: idf.clone(),
            default_idf,
        });
        (idf, default_idf)
    }
}

#[async_trait]
impl IntentAnalyzer for DecisionEngine {
    async fn analyze_intent(
        &self,
        intent: &str,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult> {
        self.analyze(intent, context)
    }
}

/// TF-IDF weighted keyword overlap, normalized by the intent's maximum.
fn keyword_overlap(
    intent_keywords: &[String],
    entity_keywords: &[String],
    idf: &HashMap<String, f64>,
    default_idf: f64,
) -> f64 {
    if intent_keywords.is_empty() || entity_keywords.is_empty() {
        return 0.0;
    }

    // Intent keywords no entity carries weigh like a singleton would.
    let weight_of = |keyword: &str| idf.get(keyword).copied().unwrap_or(default_idf);

    let mut score = 0.0;
    let mut max_possible = 0.0;
    for keyword in intent_keywords {
        let weight = weight_of(keyword);
        max_possible += weight;
        if entity_keywords.iter().any(|k| k == keyword) {
            score += weight;
        } else if entity_keywords
            .iter()
            .any(|k| k.starts_with(keyword.as_str()) || keyword.starts_with(k.as_str()))
        {
            score += 0.5 * weight;
        }
    }

    if max_possible == 0.0 {
        0.0
    } else {
        score / max_possible
    }
}

/// Token-set overlap with prefix matches at half weight, normalized by the
/// smaller set and clamped to 1.
fn purpose_overlap(intent_tokens: &BTreeSet<String>, purpose: &BTreeSet<String>) -> f64 {
    if intent_tokens.is_empty() || purpose.is_empty() {
        return 0.0;
    }
    let mut score = 0.0;
    for token in intent_tokens {
        if purpose.contains(token) {
            score += 1.0;
        } else if purpose
            .iter()
            .any(|p| p.starts_with(token.as_str()) || token.starts_with(p.as_str()))
        {
            score += 0.5;
        }
    }
    let norm = intent_tokens.len().min(purpose.len()) as f64;
    (score / norm).min(1.0)
}

fn purpose_tokens(text: &str) -> BTreeSet<String> {
    extract_keywords(text).into_iter().collect()
}

/// Breadth-first walk of the reverse edges: every transitive consumer.
fn impact_analysis(entity: &Entity, doc: &RegistryDocument, total: usize) -> ImpactAnalysis {
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = entity.used_by.iter().cloned().collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if let Some(consumer) = doc.find(&id) {
            for next in &consumer.used_by {
                if !visited.contains(next) {
                    queue.push_back(next.clone());
                }
            }
        }
    }

    let count = visited.len();
    ImpactAnalysis {
        affected: visited.into_iter().collect(),
        count,
        percentage: if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        },
    }
}

/// Why an entity did not win over CREATE, as true rejection statements.
fn rejection_reasons_for(
    entity: &Entity,
    relevance: f64,
    impact: &ImpactAnalysis,
    config: &EngineConfig,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if relevance < config.reuse_threshold {
        reasons.push(format!(
            "relevance {:.3} below the reuse threshold {:.2}",
            round3(relevance),
            config.reuse_threshold
        ));
    }
    if relevance >= config.adapt_min_relevance {
        if entity.adaptability.score < config.adapt_min_score {
            reasons.push(format!(
                "adaptability {:.2} below the minimum {:.2}",
                entity.adaptability.score, config.adapt_min_score
            ));
        }
        if impact.percentage >= config.adapt_impact_threshold {
            reasons.push(format!(
                "downstream impact {:.1}% exceeds the {:.0}% adaptation limit",
                impact.percentage * 100.0,
                config.adapt_impact_threshold * 100.0
            ));
        }
    } else {
        reasons.push(format!(
            "relevance below the adapt band {:.2}",
            config.adapt_min_relevance
        ));
    }
    reasons
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
