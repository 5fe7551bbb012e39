//! Sampling choice groups and the generation settings derived from them.
//!
//! The search space offers two mutually exclusive choice groups. Each group is
//! decoded once, at the orchestrator's entry point, into a tagged union so the
//! rest of the pipeline never inspects key presence again.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::Configuration;
use crate::errors::SamplingError;

pub const TEMPERATURE_OR_TOP_P: &str = "temperature_or_top_p";
pub const MIROSTAT_OR_TOP_K: &str = "mirostat_or_top_k";

/// Temperature used when the nucleus branch is chosen.
pub const TOP_P_BRANCH_TEMPERATURE: f64 = 0.9;
/// Nucleus probability used when the temperature branch is chosen.
pub const TEMPERATURE_BRANCH_TOP_P: f64 = 0.65;
/// Typical sampling is pinned for every trial.
pub const FIXED_TYPICAL: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TemperatureOrTopP {
    Temperature(f64),
    TopP(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MirostatOrTopK {
    Mirostat { eta: f64, tau: f64 },
    TopK(u32),
}

/// Fully decoded sampling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature_or_top_p: TemperatureOrTopP,
    pub mirostat_or_top_k: MirostatOrTopK,
}

impl SamplingConfig {
    pub fn new(temperature_or_top_p: TemperatureOrTopP, mirostat_or_top_k: MirostatOrTopK) -> Self {
        Self {
            temperature_or_top_p,
            mirostat_or_top_k,
        }
    }

    /// Decode the nested choice mapping proposed by the optimizer.
    pub fn decode(config: &Configuration) -> Result<Self, SamplingError> {
        let temperature_or_top_p = {
            let group = choice_group(config, TEMPERATURE_OR_TOP_P)?;
            match select_branch(TEMPERATURE_OR_TOP_P, group, &[&["temperature"], &["top_p"]])? {
                0 => TemperatureOrTopP::Temperature(number(group, "temperature")?),
                _ => TemperatureOrTopP::TopP(number(group, "top_p")?),
            }
        };

        let mirostat_or_top_k = {
            let group = choice_group(config, MIROSTAT_OR_TOP_K)?;
            match select_branch(
                MIROSTAT_OR_TOP_K,
                group,
                &[&["mirostat_eta", "mirostat_tau"], &["top_k"]],
            )? {
                0 => MirostatOrTopK::Mirostat {
                    eta: number(group, "mirostat_eta")?,
                    tau: number(group, "mirostat_tau")?,
                },
                _ => MirostatOrTopK::TopK(count(group, "top_k")?),
            }
        };

        Ok(Self {
            temperature_or_top_p,
            mirostat_or_top_k,
        })
    }

    /// Re-encode as the nested mapping the optimizer works with.
    pub fn to_configuration(&self) -> Configuration {
        let first = match self.temperature_or_top_p {
            TemperatureOrTopP::Temperature(t) => json!({ "temperature": t }),
            TemperatureOrTopP::TopP(p) => json!({ "top_p": p }),
        };
        let second = match self.mirostat_or_top_k {
            MirostatOrTopK::Mirostat { eta, tau } => {
                json!({ "mirostat_eta": eta, "mirostat_tau": tau })
            }
            MirostatOrTopK::TopK(k) => json!({ "top_k": k }),
        };

        let mut map = Map::new();
        map.insert(TEMPERATURE_OR_TOP_P.to_string(), first);
        map.insert(MIROSTAT_OR_TOP_K.to_string(), second);
        Configuration::from_map(map)
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        let mut settings = GenerationSettings::default();

        match self.temperature_or_top_p {
            TemperatureOrTopP::Temperature(t) => {
                settings.temperature = t;
                settings.top_p = TEMPERATURE_BRANCH_TOP_P;
            }
            TemperatureOrTopP::TopP(p) => {
                settings.temperature = TOP_P_BRANCH_TEMPERATURE;
                settings.top_p = p;
            }
        }

        match self.mirostat_or_top_k {
            MirostatOrTopK::Mirostat { eta, tau } => {
                settings.mirostat = true;
                settings.mirostat_eta = eta;
                settings.mirostat_tau = tau;
            }
            MirostatOrTopK::TopK(k) => {
                settings.mirostat = false;
                settings.top_k = k;
            }
        }

        settings.typical = FIXED_TYPICAL;
        settings
    }
}

/// Settings object handed to the text-generation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub top_p: f64,
    /// 0 disables top-k filtering.
    pub top_k: u32,
    pub typical: f64,
    pub mirostat: bool,
    pub mirostat_eta: f64,
    pub mirostat_tau: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.8,
            top_k: 50,
            typical: 0.0,
            mirostat: false,
            mirostat_eta: 0.1,
            mirostat_tau: 1.5,
        }
    }
}

fn choice_group<'a>(
    config: &'a Configuration,
    group: &str,
) -> Result<&'a Map<String, Value>, SamplingError> {
    match config.get(group) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(SamplingError::InvalidValue {
            field: group.to_string(),
            message: format!("expected a mapping, got {other}"),
        }),
        None => Err(SamplingError::MissingChoice {
            group: group.to_string(),
        }),
    }
}

/// Index of the single branch whose marker keys are present in `map`.
fn select_branch(
    group: &str,
    map: &Map<String, Value>,
    branches: &[&[&str]],
) -> Result<usize, SamplingError> {
    let present: Vec<usize> = branches
        .iter()
        .enumerate()
        .filter(|(_, keys)| keys.iter().any(|k| map.contains_key(*k)))
        .map(|(i, _)| i)
        .collect();

    match present.as_slice() {
        [single] => Ok(*single),
        [] => Err(SamplingError::MissingChoice {
            group: group.to_string(),
        }),
        _ => Err(SamplingError::AmbiguousChoice {
            group: group.to_string(),
            keys: map.keys().cloned().collect(),
        }),
    }
}

fn number(map: &Map<String, Value>, field: &str) -> Result<f64, SamplingError> {
    let value = map.get(field).ok_or_else(|| SamplingError::InvalidValue {
        field: field.to_string(),
        message: "missing".to_string(),
    })?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SamplingError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a finite number, got {value}"),
        })
}

fn count(map: &Map<String, Value>, field: &str) -> Result<u32, SamplingError> {
    let raw = number(map, field)?;
    if raw < 0.0 || raw.fract() != 0.0 || raw > u32::MAX as f64 {
        return Err(SamplingError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a non-negative integer, got {raw}"),
        });
    }
    Ok(raw as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> Configuration {
        Configuration::new(value).unwrap()
    }

    #[test]
    fn decodes_temperature_and_top_k() {
        let decoded = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7},
            "mirostat_or_top_k": {"top_k": 40}
        })))
        .unwrap();

        assert_eq!(decoded.temperature_or_top_p, TemperatureOrTopP::Temperature(0.7));
        assert_eq!(decoded.mirostat_or_top_k, MirostatOrTopK::TopK(40));

        let settings = decoded.generation_settings();
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.top_p, TEMPERATURE_BRANCH_TOP_P);
        assert_eq!(settings.top_k, 40);
        assert!(!settings.mirostat);
        assert_eq!(settings.typical, FIXED_TYPICAL);
    }

    #[test]
    fn decodes_top_p_and_mirostat() {
        let decoded = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"top_p": 0.95},
            "mirostat_or_top_k": {"mirostat_eta": 0.1, "mirostat_tau": 2.5}
        })))
        .unwrap();

        let settings = decoded.generation_settings();
        assert_eq!(settings.temperature, TOP_P_BRANCH_TEMPERATURE);
        assert_eq!(settings.top_p, 0.95);
        assert!(settings.mirostat);
        assert_eq!(settings.mirostat_eta, 0.1);
        assert_eq!(settings.mirostat_tau, 2.5);
    }

    #[test]
    fn missing_group_is_rejected() {
        let err = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7}
        })))
        .unwrap_err();
        assert_eq!(
            err,
            SamplingError::MissingChoice {
                group: MIROSTAT_OR_TOP_K.to_string()
            }
        );
    }

    #[test]
    fn empty_or_ambiguous_branch_is_rejected() {
        let err = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {},
            "mirostat_or_top_k": {"top_k": 40}
        })))
        .unwrap_err();
        assert!(matches!(err, SamplingError::MissingChoice { .. }));

        let err = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7, "top_p": 0.5},
            "mirostat_or_top_k": {"top_k": 40}
        })))
        .unwrap_err();
        assert!(matches!(err, SamplingError::AmbiguousChoice { .. }));
    }

    #[test]
    fn incomplete_mirostat_branch_is_rejected() {
        let err = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7},
            "mirostat_or_top_k": {"mirostat_eta": 0.1}
        })))
        .unwrap_err();
        assert!(matches!(
            err,
            SamplingError::InvalidValue { ref field, .. } if field == "mirostat_tau"
        ));
    }

    #[test]
    fn top_k_must_be_integral() {
        let err = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7},
            "mirostat_or_top_k": {"top_k": 4.5}
        })))
        .unwrap_err();
        assert!(matches!(err, SamplingError::InvalidValue { .. }));

        let ok = SamplingConfig::decode(&config(json!({
            "temperature_or_top_p": {"temperature": 0.7},
            "mirostat_or_top_k": {"top_k": 45.0}
        })))
        .unwrap();
        assert_eq!(ok.mirostat_or_top_k, MirostatOrTopK::TopK(45));
    }

    #[test]
    fn encode_then_decode_is_stable() {
        let original = SamplingConfig::new(
            TemperatureOrTopP::TopP(0.42),
            MirostatOrTopK::Mirostat { eta: 0.25, tau: 1.5 },
        );
        let encoded = original.to_configuration();
        assert_eq!(SamplingConfig::decode(&encoded).unwrap(), original);
    }
}
