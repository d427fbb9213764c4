//! Behavioral clustering and prompt sampling for one evolving population.
//!
//! An `Island` holds every registered variant of a single target function,
//! grouped into clusters by score signature (the ordered vector of per-test
//! scores). Prompt generation samples a temperature-annealed subset of
//! high-scoring clusters and assembles the sampled implementations into a
//! versioned prompt for the code-generating oracle.
//!
//! Features:
//! - Value-keyed clustering: identical score signatures share one cluster
//! - Sawtooth temperature anneal tied to the registration count
//! - Softmax cluster selection, independent draws with replacement
//! - Versioned prompt assembly with recursive-call rewriting

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::code::{rename_function_calls, Function, Program};
use crate::sampling;

/// Errors surfaced by island construction and prompt generation.
#[derive(Debug, thiserror::Error)]
pub enum IslandError {
    #[error("cluster sampling temperature period must be positive, got {0}")]
    InvalidTemperaturePeriod(u32),

    #[error("no programs available to build a prompt")]
    NoProgramsAvailable,
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Ordered per-test score vector identifying a program's behavioral class.
///
/// Two evaluations with bitwise-identical score sequences belong to the same
/// cluster. Equality and hashing go through the raw `f64` bit patterns so
/// the vector can key a map; the scores come from repeated runs of the same
/// deterministic harness, so exact-bit identity is the right notion of
/// "same behavior".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<u64>);

impl Signature {
    /// Extract a signature from a per-test score map.
    ///
    /// `BTreeMap` iterates in key order, so logically-equivalent test
    /// batteries always produce comparable signatures. An empty map yields
    /// the empty signature; all such registrations share one cluster.
    pub fn from_scores(scores_per_test: &BTreeMap<String, f64>) -> Self {
        Signature(scores_per_test.values().map(|s| s.to_bits()).collect())
    }

    /// The score values, in signature order.
    pub fn values(&self) -> Vec<f64> {
        self.0.iter().map(|&bits| f64::from_bits(bits)).collect()
    }

    /// Number of tests the signature covers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the signature came from an empty test battery.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// A bucket of program variants that all produced one score signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    score: f64,
    programs: Vec<Function>,
}

impl Cluster {
    /// Create a cluster around its first program.
    fn new(score: f64, first_program: Function) -> Self {
        Cluster {
            score,
            programs: vec![first_program],
        }
    }

    /// Fitness of this cluster, fixed when it was created from the reduced
    /// score of its first program. Later insertions do not recompute it.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Number of variants in this cluster.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Clusters are created around a first program and never shrink.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Append a variant whose evaluation produced this cluster's signature.
    pub fn register_program(&mut self, program: Function) {
        self.programs.push(program);
    }

    /// Pick one variant uniformly at random.
    ///
    /// Which member to favor is a policy choice; uniform keeps every variant
    /// reachable and is deterministic under a seeded generator.
    pub fn sample_program(&self, rng: &mut impl Rng) -> &Function {
        assert!(!self.programs.is_empty(), "cluster must not be empty");
        &self.programs[rng.gen_range(0..self.programs.len())]
    }
}

// ---------------------------------------------------------------------------
// Island configuration
// ---------------------------------------------------------------------------

/// Evolution hyperparameters for one island.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IslandConfig {
    /// Maximum number of sampled implementations to include in one prompt.
    pub functions_per_prompt: usize,
    /// Initial cluster sampling temperature (the peak of the sawtooth).
    pub temperature_init: f64,
    /// Length of one anneal period, in registrations. Must be positive.
    pub temperature_period: u32,
}

impl Default for IslandConfig {
    fn default() -> Self {
        IslandConfig {
            functions_per_prompt: 2,
            temperature_init: 0.1,
            temperature_period: 30_000,
        }
    }
}

impl IslandConfig {
    /// Small configuration for tests and demos: hotter sampling, short
    /// anneal period so temperature movement is visible quickly.
    pub fn quick() -> Self {
        IslandConfig {
            functions_per_prompt: 2,
            temperature_init: 1.0,
            temperature_period: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Island
// ---------------------------------------------------------------------------

/// A sub-population of program variants for one target function.
///
/// Owns the program template providing context code, the evolution
/// hyperparameters, and the signature-to-cluster map. Registration and
/// prompt generation are synchronous; calls on one island must be
/// serialized, but distinct islands are fully independent.
#[derive(Debug, Clone)]
pub struct Island {
    /// Skeleton program whose function slot the prompt builder replaces.
    template: Program,
    /// Name of the function under evolution.
    function_to_evolve: String,
    config: IslandConfig,
    clusters: HashMap<Signature, Cluster>,
    /// Signatures in first-seen order; `HashMap` iteration order is not
    /// stable, and prompt math needs a reproducible indexing.
    signature_order: Vec<Signature>,
    /// Total registrations ever made, across all clusters.
    num_programs: usize,
}

impl Island {
    /// Create an empty island for `function_to_evolve` inside `template`.
    ///
    /// Fails fast if the temperature period is zero: the anneal would
    /// divide by it on the first temperature read.
    pub fn new(
        template: Program,
        function_to_evolve: impl Into<String>,
        config: IslandConfig,
    ) -> Result<Self, IslandError> {
        if config.temperature_period == 0 {
            return Err(IslandError::InvalidTemperaturePeriod(
                config.temperature_period,
            ));
        }

        Ok(Island {
            template,
            function_to_evolve: function_to_evolve.into(),
            config,
            clusters: HashMap::new(),
            signature_order: Vec::new(),
            num_programs: 0,
        })
    }

    /// Name of the function under evolution.
    pub fn function_to_evolve(&self) -> &str {
        &self.function_to_evolve
    }

    /// Total registrations ever made. Equals the sum of all cluster sizes.
    pub fn num_programs(&self) -> usize {
        self.num_programs
    }

    /// Number of distinct score signatures seen so far.
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Record a program variant and the per-test scores it achieved.
    ///
    /// A previously unseen signature opens a new cluster whose fitness is
    /// fixed to the reduced score; a repeat signature appends to its
    /// existing cluster. Either way the registration count advances by
    /// exactly one.
    pub fn register_program(&mut self, program: Function, scores_per_test: &BTreeMap<String, f64>) {
        let signature = Signature::from_scores(scores_per_test);

        match self.clusters.entry(signature.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().register_program(program);
            }
            Entry::Vacant(entry) => {
                let score = sampling::reduce_score(scores_per_test);
                log::debug!(
                    "new cluster (score {:.4}) for signature of {} tests",
                    score,
                    signature.len()
                );
                entry.insert(Cluster::new(score, program));
                self.signature_order.push(signature);
            }
        }

        self.num_programs += 1;
    }

    /// Current cluster sampling temperature.
    ///
    /// Sawtooth anneal: the value peaks at the configured initial
    /// temperature just after each period boundary and decays linearly
    /// toward zero until the next one.
    pub fn temperature(&self) -> f64 {
        let period = self.config.temperature_period as usize;
        let phase = self.num_programs % period;
        self.config.temperature_init * (1.0 - phase as f64 / period as f64)
    }

    /// Known signatures, in first-seen order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signature_order
    }

    /// Cluster scores, parallel to `signatures`. A signature missing from
    /// the map would violate the registration invariant; 0.0 stands in
    /// rather than panicking inside derived state.
    pub fn scores(&self) -> Vec<f64> {
        self.signature_order
            .iter()
            .map(|signature| {
                self.clusters
                    .get(signature)
                    .map(Cluster::score)
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Cluster selection probabilities at the current temperature.
    pub fn probabilities(&self) -> Vec<f64> {
        sampling::softmax(&self.scores(), self.temperature())
    }

    /// Sample implementations and build the prompt asking the oracle for
    /// the next version.
    ///
    /// Draws `min(functions_per_prompt, num_clusters)` cluster indices
    /// independently, with replacement, from the softmax distribution, so a
    /// strong cluster may contribute more than one variant. One member is
    /// sampled from each drawn cluster, the collection is stable-sorted by
    /// ascending cluster score (ties keep draw order), and the sorted list
    /// is assembled into the prompt.
    ///
    /// Returns the prompt text and the version number the oracle is asked
    /// to produce, one past the header's version index.
    pub fn get_prompt(&self, rng: &mut impl Rng) -> Result<(String, usize), IslandError> {
        let k = self.config.functions_per_prompt.min(self.signature_order.len());
        if k == 0 {
            return Err(IslandError::NoProgramsAvailable);
        }

        let probabilities = self.probabilities();
        let mut sampled: Vec<(Function, f64)> = Vec::with_capacity(k);
        for _ in 0..k {
            let index = sampling::random_weighted_index(&probabilities, rng);
            let cluster = &self.clusters[&self.signature_order[index]];
            sampled.push((cluster.sample_program(rng).clone(), cluster.score()));
        }

        // Vec::sort_by is stable: equal scores keep their draw order.
        sampled.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let implementations: Vec<Function> =
            sampled.into_iter().map(|(function, _)| function).collect();
        let new_version_number = k + 1;

        let prompt = self.generate_prompt(&implementations)?;
        log::debug!(
            "prompt built from {} sampled implementations, requesting version {}",
            k,
            new_version_number
        );
        Ok((prompt, new_version_number))
    }

    /// Assemble the prompt text from implementations already sorted by
    /// ascending fitness (strongest last).
    ///
    /// Implementation `i` becomes `<name>_v<i>`, with the docstring of each
    /// non-first version pointing at its predecessor and recursive
    /// self-calls rewritten to the versioned name. A bodyless header copy
    /// of the strongest variant, named one version past it, is appended for
    /// the oracle to complete. The template's function slot is replaced
    /// with the result and the template rendered to text; the template is
    /// cloned per call, so in-flight prompts never share mutable structure.
    pub fn generate_prompt(&self, implementations: &[Function]) -> Result<String, IslandError> {
        if implementations.is_empty() {
            // The header is copied from the strongest implementation; with
            // none sampled there is nothing to copy.
            return Err(IslandError::NoProgramsAvailable);
        }

        let base = &self.function_to_evolve;
        let mut versioned: Vec<Function> = Vec::with_capacity(implementations.len() + 1);

        for (i, implementation) in implementations.iter().enumerate() {
            let mut function = implementation.clone();
            function.name = format!("{}_v{}", base, i);
            if i >= 1 {
                function.docstring = Some(format!("Improved version of `{}_v{}`.", base, i - 1));
            }
            function.body = rename_function_calls(&function.body, base, &function.name);
            versioned.push(function);
        }

        let next_version = implementations.len();
        let strongest = versioned.last().expect("implementations is non-empty");
        let mut header = strongest.clone();
        header.name = format!("{}_v{}", base, next_version);
        header.body = String::new();
        header.docstring = Some(format!(
            "Improved version of `{}_v{}`.",
            base,
            next_version - 1
        ));
        versioned.push(header);

        let mut prompt_program = self.template.clone();
        prompt_program.functions = versioned;
        Ok(prompt_program.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn variant(body: &str) -> Function {
        Function {
            name: "priority".to_string(),
            args: "item: f64, bins: &[f64]".to_string(),
            return_type: Some("f64".to_string()),
            docstring: Some("Score how well `item` fits each bin.".to_string()),
            body: format!("    {}", body),
        }
    }

    fn template() -> Program {
        Program {
            preface: "// Online bin packing heuristics.".to_string(),
            functions: vec![variant("0.0")],
        }
    }

    fn island(config: IslandConfig) -> Island {
        Island::new(template(), "priority", config).unwrap()
    }

    // --- Signature tests ---

    #[test]
    fn test_signature_value_equality() {
        let a = Signature::from_scores(&scores(&[("t0", 0.5), ("t1", 1.0)]));
        let b = Signature::from_scores(&scores(&[("t0", 0.5), ("t1", 1.0)]));
        let c = Signature::from_scores(&scores(&[("t0", 0.5), ("t1", 0.9)]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.values(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_signature_order_follows_test_names() {
        // BTreeMap iterates by key, so insertion order does not matter.
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), 0.1);
        forward.insert("b".to_string(), 0.2);
        let mut reversed = BTreeMap::new();
        reversed.insert("b".to_string(), 0.2);
        reversed.insert("a".to_string(), 0.1);
        assert_eq!(
            Signature::from_scores(&forward),
            Signature::from_scores(&reversed)
        );
    }

    // --- Construction and registration ---

    #[test]
    fn test_zero_temperature_period_is_rejected() {
        let config = IslandConfig {
            temperature_period: 0,
            ..IslandConfig::quick()
        };
        let err = Island::new(template(), "priority", config).unwrap_err();
        assert!(matches!(err, IslandError::InvalidTemperaturePeriod(0)));
    }

    #[test]
    fn test_same_signature_shares_one_cluster() {
        let mut island = island(IslandConfig::quick());
        let s = scores(&[("t0", 0.4), ("t1", 0.6)]);
        island.register_program(variant("item"), &s);
        island.register_program(variant("item * 2.0"), &s);

        assert_eq!(island.num_clusters(), 1);
        assert_eq!(island.num_programs(), 2);
        assert_eq!(island.signatures().len(), 1);
    }

    #[test]
    fn test_distinct_signatures_open_distinct_clusters() {
        let mut island = island(IslandConfig::quick());
        island.register_program(variant("item"), &scores(&[("t0", 0.2)]));
        island.register_program(variant("-item"), &scores(&[("t0", 0.9)]));

        assert_eq!(island.num_clusters(), 2);
        assert_eq!(island.num_programs(), 2);
        assert_eq!(island.scores(), vec![0.2, 0.9]);
    }

    #[test]
    fn test_cluster_score_fixed_at_creation() {
        let mut island = island(IslandConfig::quick());
        let s = scores(&[("t0", 0.5)]);
        island.register_program(variant("item"), &s);
        island.register_program(variant("item + 1.0"), &s);
        // Score is set from the first registration and never recomputed.
        assert_eq!(island.scores(), vec![0.5]);
    }

    #[test]
    fn test_empty_score_map_collapses_to_one_cluster() {
        let mut island = island(IslandConfig::quick());
        let empty = BTreeMap::new();
        island.register_program(variant("1.0"), &empty);
        island.register_program(variant("2.0"), &empty);

        assert_eq!(island.num_clusters(), 1);
        assert_eq!(island.num_programs(), 2);
        assert!(island.signatures()[0].is_empty());
        assert_eq!(island.scores(), vec![0.0]);
    }

    #[test]
    fn test_num_programs_matches_cluster_sizes() {
        let mut island = island(IslandConfig::quick());
        for i in 0..25 {
            let s = scores(&[("t0", (i % 4) as f64 / 4.0)]);
            island.register_program(variant(&format!("{}.0", i)), &s);
        }
        let total: usize = island
            .signatures()
            .iter()
            .map(|sig| island.clusters[sig].len())
            .sum();
        assert_eq!(island.num_programs(), total);
        assert_eq!(island.num_programs(), 25);
    }

    // --- Temperature schedule ---

    #[test]
    fn test_temperature_sawtooth() {
        let config = IslandConfig {
            functions_per_prompt: 2,
            temperature_init: 1.0,
            temperature_period: 10,
        };
        let mut island = island(config);

        assert!((island.temperature() - 1.0).abs() < 1e-12, "starts at T0");

        let mut previous = f64::INFINITY;
        for i in 0..10 {
            let s = scores(&[("t0", i as f64)]);
            let t = island.temperature();
            assert!(
                t < previous || i == 0,
                "temperature must strictly decrease within a period"
            );
            previous = t;
            island.register_program(variant(&format!("{}.0", i)), &s);
        }

        // After exactly P registrations the schedule wraps back to T0.
        assert_eq!(island.num_programs(), 10);
        assert!((island.temperature() - 1.0).abs() < 1e-12, "wraps at P");
    }

    // --- Probabilities ---

    #[test]
    fn test_probabilities_parallel_to_signatures() {
        let mut island = island(IslandConfig::quick());
        island.register_program(variant("item"), &scores(&[("t0", 0.2)]));
        island.register_program(variant("-item"), &scores(&[("t0", 0.9)]));

        let probs = island.probabilities();
        assert_eq!(probs.len(), island.signatures().len());
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(probs[1] > probs[0], "higher-scoring cluster gets more mass");
    }

    // --- Prompt generation ---

    #[test]
    fn test_get_prompt_with_no_clusters_is_an_error() {
        let island = island(IslandConfig::quick());
        let mut rng = StdRng::seed_from_u64(1);
        let err = island.get_prompt(&mut rng).unwrap_err();
        assert!(matches!(err, IslandError::NoProgramsAvailable));
    }

    #[test]
    fn test_generate_prompt_empty_input_is_an_error() {
        let island = island(IslandConfig::quick());
        let err = island.generate_prompt(&[]).unwrap_err();
        assert!(matches!(err, IslandError::NoProgramsAvailable));
    }

    #[test]
    fn test_generate_prompt_versions_and_header() {
        let island = island(IslandConfig::quick());
        let implementations = vec![variant("item"), variant("item * 2.0")];
        let prompt = island.generate_prompt(&implementations).unwrap();

        let parsed = Program::parse(&prompt).unwrap();
        assert_eq!(parsed.preface, "// Online bin packing heuristics.");
        assert_eq!(parsed.functions.len(), 3);

        assert_eq!(parsed.functions[0].name, "priority_v0");
        assert_eq!(parsed.functions[1].name, "priority_v1");
        assert_eq!(parsed.functions[2].name, "priority_v2");

        // v0 keeps its own docstring; later versions chain backwards.
        assert_eq!(
            parsed.functions[0].docstring.as_deref(),
            Some("Score how well `item` fits each bin.")
        );
        assert_eq!(
            parsed.functions[1].docstring.as_deref(),
            Some("Improved version of `priority_v0`.")
        );
        assert_eq!(
            parsed.functions[2].docstring.as_deref(),
            Some("Improved version of `priority_v1`.")
        );

        // The header is the oracle's slot: signature of the strongest
        // variant, empty body.
        assert_eq!(parsed.functions[2].body, "");
        assert_eq!(parsed.functions[2].args, "item: f64, bins: &[f64]");
    }

    #[test]
    fn test_generate_prompt_rewrites_recursive_calls() {
        let island = island(IslandConfig::quick());
        let recursive = Function {
            name: "priority".to_string(),
            args: "item: f64, depth: u32".to_string(),
            return_type: Some("f64".to_string()),
            docstring: None,
            body: "    if depth == 0 { item } else { priority(item / 2.0, depth - 1) }"
                .to_string(),
        };
        let prompt = island.generate_prompt(&[recursive]).unwrap();
        let parsed = Program::parse(&prompt).unwrap();

        assert!(
            parsed.functions[0].body.contains("priority_v0(item / 2.0"),
            "self-call should follow the rename: {}",
            parsed.functions[0].body
        );
        assert!(!parsed.functions[0].body.contains("priority(item"));
    }

    #[test]
    fn test_get_prompt_two_cluster_scenario() {
        // T0=1, P=10, two implementations per prompt; clusters at scores
        // 0.2 and 0.9. The prompt must order implementations by ascending
        // cluster score and ask for version 3.
        let config = IslandConfig {
            functions_per_prompt: 2,
            temperature_init: 1.0,
            temperature_period: 10,
        };
        let mut island = island(config);
        island.register_program(variant("item"), &scores(&[("t0", 0.2)]));
        island.register_program(variant("-item"), &scores(&[("t0", 0.9)]));

        let mut rng = StdRng::seed_from_u64(42);
        let (prompt, new_version) = island.get_prompt(&mut rng).unwrap();
        assert_eq!(new_version, 3);

        let parsed = Program::parse(&prompt).unwrap();
        assert_eq!(parsed.functions.len(), 3);
        assert_eq!(parsed.functions[2].name, "priority_v2");
        assert_eq!(parsed.functions[2].body, "");

        // Map each sampled body back to its cluster score; ascending order
        // must hold no matter which clusters the draws hit.
        let score_of = |body: &str| -> f64 {
            if body.contains("-item") {
                0.9
            } else {
                0.2
            }
        };
        let first = score_of(&parsed.functions[0].body);
        let second = score_of(&parsed.functions[1].body);
        assert!(
            first <= second,
            "implementations must be sorted by ascending score: {} then {}",
            first,
            second
        );
    }

    #[test]
    fn test_get_prompt_deterministic_under_seed() {
        let mut island = island(IslandConfig::quick());
        for i in 0..6 {
            let s = scores(&[("t0", i as f64 / 6.0)]);
            island.register_program(variant(&format!("item + {}.0", i)), &s);
        }

        let (prompt_a, version_a) = island.get_prompt(&mut StdRng::seed_from_u64(5)).unwrap();
        let (prompt_b, version_b) = island.get_prompt(&mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(prompt_a, prompt_b, "same seed must reproduce the prompt");
        assert_eq!(version_a, version_b);
    }

    #[test]
    fn test_get_prompt_caps_at_available_clusters() {
        let config = IslandConfig {
            functions_per_prompt: 5,
            ..IslandConfig::quick()
        };
        let mut island = island(config);
        island.register_program(variant("item"), &scores(&[("t0", 0.4)]));

        let mut rng = StdRng::seed_from_u64(8);
        let (prompt, new_version) = island.get_prompt(&mut rng).unwrap();
        // Only one cluster exists, so one implementation plus the header.
        assert_eq!(new_version, 2);
        let parsed = Program::parse(&prompt).unwrap();
        assert_eq!(parsed.functions.len(), 2);
    }

    #[test]
    fn test_get_prompt_zero_functions_per_prompt_is_an_error() {
        let config = IslandConfig {
            functions_per_prompt: 0,
            ..IslandConfig::quick()
        };
        let mut island = island(config);
        island.register_program(variant("item"), &scores(&[("t0", 0.4)]));

        let mut rng = StdRng::seed_from_u64(2);
        let err = island.get_prompt(&mut rng).unwrap_err();
        assert!(matches!(err, IslandError::NoProgramsAvailable));
    }

    #[test]
    fn test_get_prompt_leaves_island_untouched() {
        let mut island = island(IslandConfig::quick());
        island.register_program(variant("item"), &scores(&[("t0", 0.3)]));

        let before = island.template.to_string();
        let mut rng = StdRng::seed_from_u64(4);
        let _ = island.get_prompt(&mut rng).unwrap();
        let _ = island.get_prompt(&mut rng).unwrap();
        assert_eq!(
            island.template.to_string(),
            before,
            "prompt assembly must work on a clone of the template"
        );
        assert_eq!(island.num_programs(), 1);
    }
}
