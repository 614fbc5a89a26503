/// Error code registry for fleet-recovery
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Inventory errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Plan errors
/// - 7000-7999: Argument errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_EMPTY: u16 = 1001;
    pub const CONFIG_IO_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_NO_PLANS: u16 = 1004;
    pub const CONFIG_UNKNOWN_EXEC: u16 = 1005;
    pub const CONFIG_CYCLE: u16 = 1006;
    pub const CONFIG_PLAN_NOT_FOUND: u16 = 1007;
    pub const CONFIG_INVALID_TOML: u16 = 1008;

    // Inventory errors (3000-3999)
    pub const INVENTORY_GENERIC: u16 = 3000;
    pub const INVENTORY_LIST_RESOURCES: u16 = 3001;
    pub const INVENTORY_READ_DUT: u16 = 3002;
    pub const INVENTORY_UPDATE_DUT: u16 = 3003;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_NOT_FOUND: u16 = 4001;
    pub const EXEC_TIMEOUT: u16 = 4002;
    pub const EXEC_SSH_INTERNAL: u16 = 4003;
    pub const EXEC_CLI_NOT_FOUND: u16 = 4004;
    pub const EXEC_CANCELLED: u16 = 4006;
    pub const EXEC_DEADLINE_EXCEEDED: u16 = 4007;

    // Plan errors (5000-5999)
    pub const PLAN_GENERIC: u16 = 5000;
    pub const PLAN_FAILED: u16 = 5001;
    pub const PLAN_CLOSING_FAILED: u16 = 5002;

    // Argument errors (7000-7999)
    pub const ARGS_GENERIC: u16 = 7000;
    pub const ARGS_MISSING_UNIT: u16 = 7001;
    pub const ARGS_MISSING_CONFIG: u16 = 7002;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_MULTIPLE: u16 = 9001;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "General configuration error",
        ErrorCode::CONFIG_EMPTY => "Configuration document is empty",
        ErrorCode::CONFIG_IO_ERROR => "Configuration could not be read",
        ErrorCode::CONFIG_INVALID_JSON => "Configuration is not valid JSON",
        ErrorCode::CONFIG_NO_PLANS => "Configuration has no plans",
        ErrorCode::CONFIG_UNKNOWN_EXEC => "Action refers to an unregistered exec",
        ErrorCode::CONFIG_CYCLE => "Plan actions form a cycle",
        ErrorCode::CONFIG_PLAN_NOT_FOUND => "Plan listed in plan_names is not defined",
        ErrorCode::CONFIG_INVALID_TOML => "Application configuration is not valid TOML",

        ErrorCode::INVENTORY_GENERIC => "General inventory error",
        ErrorCode::INVENTORY_LIST_RESOURCES => "Failed to list resources for unit",
        ErrorCode::INVENTORY_READ_DUT => "Failed to read device from inventory",
        ErrorCode::INVENTORY_UPDATE_DUT => "Failed to update device in inventory",

        ErrorCode::EXEC_GENERIC => "General execution error",
        ErrorCode::EXEC_NOT_FOUND => "Exec is not registered",
        ErrorCode::EXEC_TIMEOUT => "Remote command timed out",
        ErrorCode::EXEC_SSH_INTERNAL => "Remote transport failure",
        ErrorCode::EXEC_CLI_NOT_FOUND => "Remote command not found",
        ErrorCode::EXEC_CANCELLED => "Execution was cancelled",
        ErrorCode::EXEC_DEADLINE_EXCEEDED => "Run deadline exceeded",

        ErrorCode::PLAN_GENERIC => "General plan error",
        ErrorCode::PLAN_FAILED => "Plan failed",
        ErrorCode::PLAN_CLOSING_FAILED => "Closing plan failed",

        ErrorCode::ARGS_GENERIC => "Invalid run arguments",
        ErrorCode::ARGS_MISSING_UNIT => "Unit name is not provided",
        ErrorCode::ARGS_MISSING_CONFIG => "Configuration is not provided",

        ErrorCode::OTHER_GENERIC => "Unknown error",
        ErrorCode::OTHER_MULTIPLE => "Multiple resources failed",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_have_descriptions() {
        for code in [
            ErrorCode::CONFIG_CYCLE,
            ErrorCode::INVENTORY_READ_DUT,
            ErrorCode::EXEC_CANCELLED,
            ErrorCode::PLAN_FAILED,
            ErrorCode::ARGS_MISSING_UNIT,
        ] {
            assert_ne!(describe_error_code(code), "Unknown error code");
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(describe_error_code(1), "Unknown error code");
    }
}
