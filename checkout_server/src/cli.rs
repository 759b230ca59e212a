use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets. The ledger RPC url often
    // carries an API key, so only its presence is shown.
    const DISPLAY_ENVS: [&str; 21] = [
        "RUST_LOG",
        "CKO_HOST",
        "CKO_PORT",
        "CKO_DATABASE_URL",
        "CKO_LEDGER_TIMEOUT",
        "CKO_MERCHANT_WALLET",
        "CKO_WEBHOOK_URL",
        "CKO_RETRY_ATTEMPTS",
        "CKO_RETRY_BASE_DELAY_MS",
        "CKO_OVERRIDE_LIMIT",
        "CKO_OVERRIDE_WINDOW",
        "CKO_ENABLE_SWEEPERS",
        "CKO_DRAFT_SWEEP_INTERVAL",
        "CKO_DRAFT_MAX_AGE_HOURS",
        "CKO_PENDING_SWEEP_INTERVAL",
        "CKO_PENDING_MAX_AGE_HOURS",
        "CKO_PENDING_REPORT_LIMIT",
        "CKO_VERIFY_SWEEP_INTERVAL",
        "CKO_VERIFY_BATCH_SIZE",
        "CKO_LEDGER_RPC_URL",
        "CKO_AMOUNT_TOLERANCE",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(_) if name == "CKO_LEDGER_RPC_URL" => "Set (hidden)".into(),
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
