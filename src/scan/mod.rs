//! Expression scanning: tokenizer, reference extractor, routing-rule
//! extractor. None of this is a general interpreter; it recognizes the
//! narrow structural subset the analysis needs and steps over the rest.
pub mod extract;
pub mod rules;
pub mod scanner;

pub use extract::{extract_references, Extraction, MeasureCatalog};
pub use rules::{extract_routing_rules, resolve_tables, RoutingRule, RuleExtraction};
pub use scanner::{tokenize, Token, MAX_NESTING_DEPTH};
