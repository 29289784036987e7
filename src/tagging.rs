//! Rule-table concept tagging.
//!
//! Classification is an ordered list of (matcher, label) pairs evaluated
//! uniformly against lowercased text. The result is the sorted set of all
//! matched labels; when nothing matches, the table's sentinel label is
//! returned so tagging is total.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use regex::Regex;

pub enum Matcher {
    /// Matches when any keyword occurs as a substring.
    AnyKeyword(&'static [&'static str]),
    /// Matches when the pattern occurs anywhere.
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Self::AnyKeyword(keywords) => {
                keywords.iter().any(|keyword| lowered.contains(keyword))
            }
            Self::Pattern(pattern) => pattern.is_match(lowered),
        }
    }
}

pub struct Rule {
    matcher: Matcher,
    label: &'static str,
}

pub struct RuleTable {
    rules: Vec<Rule>,
    sentinel: &'static str,
}

impl RuleTable {
    /// Broad tags applied to segmented blocks during convert-mode ingest.
    pub fn blocks() -> Self {
        Self {
            rules: vec![
                keyword_rule(
                    &["divergence", "curl", "laplacian", "gradient"],
                    "electromagnetics",
                ),
                keyword_rule(&["cylindrical", "spherical"], "coordinate"),
                keyword_rule(&["∂", "integral", "derivative"], "calculus"),
                keyword_rule(&["diagram explanation"], "visual_reasoning"),
            ],
            sentinel: "other",
        }
    }

    /// Broad subject tags applied to instruction text by the offline
    /// subject-tagging pass.
    pub fn subjects() -> Self {
        Self {
            rules: vec![
                keyword_rule(
                    &[
                        "vector",
                        "dot product",
                        "cross product",
                        "torque",
                        "curl",
                        "projection",
                        "scalar triple",
                    ],
                    "vector",
                ),
                keyword_rule(
                    &[
                        "coordinate",
                        "cartesian",
                        "cylindrical",
                        "spherical",
                        "polar",
                        "unit vector",
                        "transform",
                    ],
                    "coordinate",
                ),
                keyword_rule(
                    &[
                        "divergence",
                        "gradient",
                        "laplacian",
                        "∇",
                        "nabla",
                        "operator",
                        "partial derivative",
                        "scale factor",
                    ],
                    "differential_operator",
                ),
                keyword_rule(
                    &[
                        "electric", "magnetic", "em", "maxwell", "e-field", "b-field", "∇·e",
                        "∇×b",
                    ],
                    "electromagnetics",
                ),
                keyword_rule(
                    &[
                        "center of mass",
                        "moment of inertia",
                        "mass distribution",
                        "dm",
                        "triangle",
                        "disc",
                        "sphere",
                    ],
                    "mechanics",
                ),
            ],
            sentinel: "other",
        }
    }

    /// Fine-grained concept tags applied to output text by the offline
    /// concept-tagging pass.
    pub fn concepts() -> Result<Self> {
        let table = [
            (r"gauss.*law|∇•e|flux|∮e", "gauss_law"),
            (r"faraday|∇×e|∂b/∂t", "faradays_law"),
            (r"lhcp", "left_hand_circular_polarization"),
            (r"rhcp", "right_hand_circular_polarization"),
            (r"reflection coefficient", "reflection_coefficient"),
            (r"transmission coefficient", "transmission_coefficient"),
            (r"z₀", "impedance"),
            (r"∇×h", "ampere_law"),
            (r"∇•b", "gauss_magnetic"),
            (r"wave impedance", "impedance"),
            (r"β|gamma|propagation", "propagation_constant"),
            (r"lossy|conductivity|σ", "lossy_medium"),
            (r"plane wave", "plane_wave"),
            (r"electric field|e field", "electric_field"),
            (r"magnetic field|b field", "magnetic_field"),
            (r"cylindrical", "coordinate_system_cylindrical"),
            (r"spherical", "coordinate_system_spherical"),
            (r"cartesian", "coordinate_system_cartesian"),
            (r"boundary condition", "boundary_conditions"),
            (r"vector algebra|dot product|cross product", "vector_algebra"),
            (r"transmission line", "transmission_lines"),
            (r"matching|impedance match", "impedance_matching"),
            (r"eigenvalue|eigenvector", "linear_algebra"),
            (r"divergence|curl|gradient", "vector_operators"),
            (r"∫|∮|∬", "integration"),
            (r"∂", "partial_derivative"),
            (r"∇", "del_operator"),
        ];

        let mut rules = Vec::with_capacity(table.len());
        for (pattern, label) in table {
            let compiled = Regex::new(pattern)
                .with_context(|| format!("failed to compile concept pattern for `{label}`"))?;
            rules.push(Rule {
                matcher: Matcher::Pattern(compiled),
                label,
            });
        }

        Ok(Self {
            rules,
            sentinel: "other",
        })
    }

    /// Ruleless table for raw OCR pages: every block gets the `ocr`
    /// sentinel.
    pub fn raw_ocr() -> Self {
        Self {
            rules: Vec::new(),
            sentinel: "ocr",
        }
    }

    /// All labels whose rule matches the lowercased text, sorted; exactly
    /// the sentinel when none match. Never empty.
    pub fn tag(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut labels: BTreeSet<&'static str> = BTreeSet::new();

        for rule in &self.rules {
            if rule.matcher.matches(&lowered) {
                labels.insert(rule.label);
            }
        }

        if labels.is_empty() {
            return vec![self.sentinel.to_string()];
        }

        labels.into_iter().map(str::to_string).collect()
    }
}

fn keyword_rule(keywords: &'static [&'static str], label: &'static str) -> Rule {
    Rule {
        matcher: Matcher::AnyKeyword(keywords),
        label,
    }
}
