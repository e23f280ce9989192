//! Pluggable lookup of aggregate calculators by id, display name, or
//! alias — built-ins plus whatever an adapter registers at startup.
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::calculators;
use super::types::{TagValueBucket, TagValueExtended};

/// A calculator reduces one tag's bucket to zero or more output samples
/// — most built-ins yield exactly one, but `interpolate` can yield a
/// second value at the query's closing instant. Boxed as a trait object
/// so built-in function pointers and ad-hoc closures registered by a
/// caller share one type. Fallible so a custom registration can surface
/// [`CoreError::CalculatorFailure`] without forcing every built-in
/// through the same error path — the pipeline logs and skips a failing
/// calculator rather than aborting the run.
pub type Calculator = Arc<dyn Fn(&TagValueBucket) -> CoreResult<Vec<TagValueExtended>> + Send + Sync>;

/// Identity of one registered aggregate function.
#[derive(Clone)]
pub struct DataFunctionDescriptor {
    pub id: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub calculator: Calculator,
}

impl std::fmt::Debug for DataFunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFunctionDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl DataFunctionDescriptor {
    fn matches(&self, needle: &str) -> bool {
        self.id.eq_ignore_ascii_case(needle)
            || self.display_name.eq_ignore_ascii_case(needle)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(needle))
    }
}

fn builtin_descriptors() -> Vec<DataFunctionDescriptor> {
    // Every built-in in `calculators` is a pure, total function over a
    // bucket — it never fails. The `Ok(...)` wrapper here is only to
    // match the registry's fallible `Calculator` signature.
    fn descriptor(
        id: &str,
        display_name: &str,
        aliases: &[&str],
        calculator: impl Fn(&TagValueBucket) -> TagValueExtended + Send + Sync + 'static,
    ) -> DataFunctionDescriptor {
        DataFunctionDescriptor {
            id: id.to_string(),
            display_name: display_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            calculator: Arc::new(move |bucket: &TagValueBucket| Ok(vec![calculator(bucket)])),
        }
    }

    fn multi_valued_descriptor(
        id: &str,
        display_name: &str,
        aliases: &[&str],
        calculator: impl Fn(&TagValueBucket) -> Vec<TagValueExtended> + Send + Sync + 'static,
    ) -> DataFunctionDescriptor {
        DataFunctionDescriptor {
            id: id.to_string(),
            display_name: display_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            calculator: Arc::new(move |bucket: &TagValueBucket| Ok(calculator(bucket))),
        }
    }

    vec![
        multi_valued_descriptor("interpolate", "Interpolate", &["interp", "linear"], calculators::interpolate),
        descriptor("average", "Average", &["avg", "mean"], calculators::average),
        descriptor("minimum", "Minimum", &["min"], calculators::minimum),
        descriptor("maximum", "Maximum", &["max"], calculators::maximum),
        descriptor("count", "Count", &[], calculators::count),
        descriptor("range", "Range", &[], calculators::range),
        descriptor("delta", "Delta", &["diff"], calculators::delta),
        descriptor("percent_good", "PercentGood", &["pctgood", "percentgood"], calculators::percent_good),
        descriptor("percent_bad", "PercentBad", &["pctbad", "percentbad"], calculators::percent_bad),
        descriptor("variance", "Variance", &["var"], calculators::variance),
        descriptor(
            "standard_deviation",
            "StandardDeviation",
            &["stddev", "std"],
            calculators::standard_deviation,
        ),
    ]
}

/// Registry of aggregate calculators resolved by id, display name, or
/// alias (case-insensitively). Seeded with the eleven built-ins;
/// callers may add or remove custom functions at runtime.
///
/// # Why
/// An adapter embedding this crate will eventually want a calculator
/// this crate doesn't ship (a plant-specific "first good value" or a
/// vendor-defined quality roll-up). The registry exists so that need
/// doesn't require forking the bucketizer — it only needs a function
/// from `&TagValueBucket` to `TagValueExtended`.
pub struct DataFunctionRegistry {
    builtins: Vec<DataFunctionDescriptor>,
    custom: HashMap<String, DataFunctionDescriptor>,
}

impl Default for DataFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFunctionRegistry {
    pub fn new() -> Self {
        DataFunctionRegistry {
            builtins: builtin_descriptors(),
            custom: HashMap::new(),
        }
    }

    /// Ids of every built-in calculator, in registration order.
    pub fn builtins(&self) -> Vec<String> {
        self.builtins.iter().map(|d| d.id.clone()).collect()
    }

    /// Whether `id` names a built-in calculator (exact, case-sensitive
    /// id match — builtin identity, not alias resolution).
    pub fn is_builtin(&self, id: &str) -> bool {
        self.builtins.iter().any(|d| d.id == id)
    }

    /// Registers a custom calculator under a fresh id. Rejects an id
    /// that collides with a built-in or an already-registered custom
    /// function, so a later `resolve()` is never ambiguous about which
    /// calculator a name picked out.
    pub fn register_data_function(&mut self, descriptor: DataFunctionDescriptor) -> CoreResult<()> {
        if self.is_builtin(&descriptor.id) {
            return Err(CoreError::invalid_argument(format!(
                "data function id '{}' collides with a built-in",
                descriptor.id
            )));
        }
        if self.custom.contains_key(&descriptor.id) {
            return Err(CoreError::invalid_argument(format!(
                "data function id '{}' is already registered",
                descriptor.id
            )));
        }
        self.custom.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Removes a previously registered custom function. A no-op if
    /// `id` was never registered or names a built-in (built-ins are not
    /// removable).
    pub fn unregister_data_function(&mut self, id: &str) {
        self.custom.remove(id);
    }

    /// Resolves `name` against id, display name, or alias — built-ins
    /// first, then custom registrations, both case-insensitively.
    pub fn resolve(&self, name: &str) -> Option<Calculator> {
        self.builtins
            .iter()
            .chain(self.custom.values())
            .find(|d| d.matches(name))
            .map(|d| Arc::clone(&d.calculator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::types::{SampleStatus, TagValue};
    use std::time::{Duration, SystemTime};

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn resolves_builtins_case_insensitively_and_by_alias() {
        let registry = DataFunctionRegistry::new();
        assert!(registry.resolve("AVERAGE").is_some());
        assert!(registry.resolve("avg").is_some());
        assert!(registry.resolve("nonexistent").is_none());
    }

    #[test]
    fn builtins_lists_all_eleven() {
        let registry = DataFunctionRegistry::new();
        assert_eq!(registry.builtins().len(), 11);
        assert!(registry.is_builtin("average"));
        assert!(!registry.is_builtin("custom_thing"));
    }

    #[test]
    fn custom_registration_rejects_builtin_collisions_and_duplicates() {
        let mut registry = DataFunctionRegistry::new();
        let descriptor = DataFunctionDescriptor {
            id: "average".to_string(),
            display_name: "MyAverage".to_string(),
            aliases: vec![],
            calculator: Arc::new(|_: &TagValueBucket| {
                Ok(vec![TagValueExtended::new(at(0), TagValue::Numeric(0.0), SampleStatus::Good)])
            }),
        };
        assert!(registry.register_data_function(descriptor).is_err());

        let custom = DataFunctionDescriptor {
            id: "first_good".to_string(),
            display_name: "FirstGood".to_string(),
            aliases: vec!["fg".to_string()],
            calculator: Arc::new(|bucket: &TagValueBucket| {
                Ok(vec![bucket
                    .good_samples()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| TagValueExtended::new(at(0), TagValue::Null, SampleStatus::Uncertain))])
            }),
        };
        registry.register_data_function(custom.clone()).unwrap();
        assert!(registry.resolve("fg").is_some());
        assert!(registry.register_data_function(custom).is_err());
    }

    #[test]
    fn unregister_removes_a_custom_function() {
        let mut registry = DataFunctionRegistry::new();
        registry
            .register_data_function(DataFunctionDescriptor {
                id: "noop".to_string(),
                display_name: "Noop".to_string(),
                aliases: vec![],
                calculator: Arc::new(|_: &TagValueBucket| {
                    Ok(vec![TagValueExtended::new(at(0), TagValue::Null, SampleStatus::Uncertain)])
                }),
            })
            .unwrap();
        registry.unregister_data_function("noop");
        assert!(registry.resolve("noop").is_none());
    }
}
