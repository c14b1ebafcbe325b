use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tkt_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // test binary name
    path.pop(); // deps/
    path.push("tkt");
    path
}

const TICKETS_JSON: &str = r#"[
  {
    "Issue key": "INC-101",
    "Summary": "VPN disconnects every hour",
    "Resolution": "Renewed the expired VPN certificate",
    "Custom field (Immediate fix remark)": "Restart the VPN client"
  },
  {
    "Issue key": "INC-102",
    "Summary": "Printer jams on tray two",
    "Description": "Paper feed error"
  },
  {
    "Issue key": "INC-103",
    "Summary": "Mailbox quota exceeded",
    "Resolution": "nan"
  }
]"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let exports = root.join("exports");
    fs::create_dir_all(&exports).unwrap();

    fs::write(exports.join("tickets.json"), TICKETS_JSON).unwrap();
    fs::write(
        exports.join("runbook notes.txt"),
        "When the VPN drops, renew the certificate on the gateway.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/tickets.sqlite"

[retrieval]
final_limit = 5
max_chunks = 2

[server]
bind = "127.0.0.1:7342"
"#,
        root.display()
    );
    let config_path = config_dir.join("tkt.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tkt(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tkt_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("TKT_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tkt binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn export(config_path: &Path, name: &str) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    root.join("exports").join(name).to_str().unwrap().to_string()
}

fn init_and_ingest(config_path: &Path) -> String {
    let (_, stderr, ok) = run_tkt(config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let tickets = export(config_path, "tickets.json");
    let (stdout, stderr, ok) = run_tkt(config_path, &["ingest", &tickets]);
    assert!(ok, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, ok) = run_tkt(&config_path, &["init"]);
    assert!(ok, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, ok) = run_tkt(&config_path, &["init"]);
    assert!(ok, "second init failed");
}

#[test]
fn ingest_reports_fragments() {
    let (_tmp, config_path) = setup_test_env();
    let stdout = init_and_ingest(&config_path);

    assert!(stdout.contains("tickets:            3"), "{}", stdout);
    assert!(stdout.contains("fragments written:  6"), "{}", stdout);
    assert!(stdout.contains("embedded:           0"), "{}", stdout);
}

#[test]
fn reingest_leaves_unchanged_fragments_alone() {
    let (_tmp, config_path) = setup_test_env();
    init_and_ingest(&config_path);

    let tickets = export(&config_path, "tickets.json");
    let (stdout, stderr, ok) = run_tkt(&config_path, &["ingest", &tickets]);
    assert!(ok, "re-ingest failed: {}", stderr);
    assert!(stdout.contains("fragments written:  0"), "{}", stdout);
    assert!(stdout.contains("unchanged:          6"), "{}", stdout);

    let (stdout, _, _) = run_tkt(&config_path, &["stats"]);
    assert!(stdout.contains("Fragments:   6"), "{}", stdout);
}

#[test]
fn search_prints_ranked_fragments() {
    let (_tmp, config_path) = setup_test_env();
    init_and_ingest(&config_path);

    let (stdout, stderr, ok) = run_tkt(&config_path, &["search", "expired certificate"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["), "{}", stdout);
    assert!(
        stdout.lines().next().unwrap().contains("INC-101-resolution (resolution)"),
        "{}",
        stdout
    );
    assert!(stdout.contains("excerpt: \"Renewed the expired VPN certificate\""));
}

#[test]
fn search_explain_shows_ranks() {
    let (_tmp, config_path) = setup_test_env();
    init_and_ingest(&config_path);

    let (stdout, _, ok) = run_tkt(
        &config_path,
        &["search", "printer jams", "--explain", "--limit", "2"],
    );
    assert!(ok);
    assert!(stdout.contains("fused: "), "{}", stdout);
    assert!(stdout.contains("dense: -"), "{}", stdout);
    assert!(!stdout.contains("3. ["), "{}", stdout);
}

#[test]
fn search_on_empty_store_finds_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_tkt(&config_path, &["init"]);

    let (stdout, _, ok) = run_tkt(&config_path, &["search", "vpn"]);
    assert!(ok);
    assert!(stdout.contains("No results."));
}

#[test]
fn context_puts_remediation_steps_first() {
    let (_tmp, config_path) = setup_test_env();
    init_and_ingest(&config_path);

    let (stdout, stderr, ok) = run_tkt(
        &config_path,
        &["context", "restart vpn client", "--max-chunks", "1"],
    );
    assert!(ok, "context failed: {}", stderr);
    assert!(
        stdout.starts_with("Ticket: INC-101\nSection: steps\nContent:\nRestart the VPN client"),
        "{}",
        stdout
    );
    assert!(!stdout.contains("---"));
}

#[test]
fn text_documents_become_doc_tickets() {
    let (_tmp, config_path) = setup_test_env();
    run_tkt(&config_path, &["init"]);

    let notes = export(&config_path, "runbook notes.txt");
    let (_, stderr, ok) = run_tkt(&config_path, &["ingest", &notes]);
    assert!(ok, "ingest failed: {}", stderr);

    let (stdout, _, ok) = run_tkt(&config_path, &["search", "gateway certificate"]);
    assert!(ok);
    assert!(stdout.contains("DOC_RUNBOOK_NOTES-description"), "{}", stdout);
}

#[test]
fn ingest_csv_export() {
    let (tmp, config_path) = setup_test_env();
    run_tkt(&config_path, &["init"]);

    let csv = tmp.path().join("exports").join("jira.csv");
    fs::write(
        &csv,
        "Issue key,Summary,Custom field (Immediate fix remark)\n\
         INC-201,SSO login loops,\"Clear the browser cookies\nthen sign in again\"\n",
    )
    .unwrap();
    let (stdout, stderr, ok) = run_tkt(&config_path, &["ingest", csv.to_str().unwrap()]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("fragments written:  2"), "{}", stdout);

    let (stdout, _, ok) = run_tkt(&config_path, &["context", "sso cookies"]);
    assert!(ok);
    assert!(
        stdout.starts_with("Ticket: INC-201\nSection: steps"),
        "{}",
        stdout
    );
    assert!(stdout.contains("then sign in again"), "{}", stdout);
}

#[test]
fn ask_requires_a_generation_provider() {
    let (_tmp, config_path) = setup_test_env();
    init_and_ingest(&config_path);

    let (_, stderr, ok) = run_tkt(&config_path, &["ask", "how do I fix the vpn?"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"), "{}", stderr);
}

#[test]
fn unsupported_files_are_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_tkt(&config_path, &["init"]);

    let pdf = tmp.path().join("exports").join("tickets.pdf");
    fs::write(&pdf, "%PDF-1.4").unwrap();
    let (_, stderr, ok) = run_tkt(&config_path, &["ingest", pdf.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("Unsupported file type"), "{}", stderr);
}

#[test]
fn missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_tkt(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
