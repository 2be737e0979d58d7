// Core engines: identity resolution, quality rules, alert thresholds

pub mod alerts;
pub mod matching;
pub mod rules;
