//! Canonical strategy for groups and materials that have never been configured
//!
//! The synthesized row is handed to readers only; nothing here writes to the store.

use chrono::Utc;

use crate::db::strategies::{StrategyRow, StrategyValues, GROUP_DEFAULT_MATERIAL};

/// Client tag carried by a synthesized default
pub const DEFAULT_CLIENT: &str = "default";

/// The nine fixed parameter slots
pub const DEFAULT_PARAMETER_CODES: [i64; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];

/// Option chosen for every slot in the default strategy
pub const DEFAULT_OPTION_CODE: i64 = 0;

pub fn default_values() -> StrategyValues {
    StrategyValues {
        parameter_codes: DEFAULT_PARAMETER_CODES.to_vec(),
        option_codes: vec![DEFAULT_OPTION_CODE; DEFAULT_PARAMETER_CODES.len()],
        client: DEFAULT_CLIENT.to_string(),
    }
}

/// Default for a group (`material_code = 0`)
pub fn synthesize_group_default(group_code: i64) -> StrategyRow {
    synthesize(group_code, GROUP_DEFAULT_MATERIAL)
}

/// Default for a single material of `group_code`
pub fn synthesize(group_code: i64, material_code: i64) -> StrategyRow {
    StrategyRow::new(group_code, material_code, default_values(), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_default_shape() {
        let row = synthesize_group_default(12);
        assert_eq!(row.group_code, 12);
        assert_eq!(row.material_code, 0);
        assert_eq!(row.client, "default");
        assert_eq!(row.parameter_codes, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(row.option_codes, vec![0; 9]);
    }

    #[test]
    fn test_deterministic_apart_from_timestamp() {
        let first = synthesize(3, 300);
        let second = synthesize(3, 300);
        assert_eq!(first.values(), second.values());
        assert_eq!(first.material_code, second.material_code);
    }
}
