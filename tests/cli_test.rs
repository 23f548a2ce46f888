//! CLI Integration Tests
//!
//! Only paths that fail before any network access are exercised here.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli() -> Command {
        Command::cargo_bin("mizuchi-s3-engine").unwrap()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_help_lists_subcommands() {
        cli()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("upload"))
            .stdout(predicate::str::contains("delete"));
    }

    #[test]
    fn test_missing_config_file() {
        cli()
            .args(["--config", "/nonexistent/config.yaml", "delete", "--bucket", "b", "--key", "k"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load configuration"));
    }

    #[test]
    fn test_numeric_bucket_rejected() {
        let config = write_config("s3:\n  region: us-east-1\nstorage:\n  bucket: 42\n");
        cli()
            .arg("--config")
            .arg(config.path())
            .args(["upload", "Cargo.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Expected bucket to be a string"));
    }

    #[test]
    fn test_upload_requires_path() {
        cli()
            .arg("upload")
            .assert()
            .failure()
            .stderr(predicate::str::contains("<PATH>"));
    }
}
