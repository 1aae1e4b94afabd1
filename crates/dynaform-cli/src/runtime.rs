// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::config::Config;
use anyhow::{Context, Result};
use dynaform_app::{FormBackend, FormSession};
use dynaform_client::{BearerToken, Client, CredentialsProvider, NoCredentials};
use std::fmt;
use std::sync::Arc;

pub fn build_client(config: &Config) -> Result<Client> {
    let credentials: Arc<dyn CredentialsProvider> = match config.token_env() {
        Some(name) => Arc::new(BearerToken::from_env(name)?),
        None => Arc::new(NoCredentials),
    };
    Client::with_credentials(config.base_url(), config.timeout()?, credentials)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub form_id: String,
    pub fields: usize,
    pub total_records: u64,
    pub total_pages: u32,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "form {}: {} fields, {} records, {} pages",
            self.form_id, self.fields, self.total_records, self.total_pages
        )
    }
}

/// Opens the form the way the TUI would and reports what came back.
pub fn check<B: FormBackend + ?Sized>(backend: &mut B, form_id: &str) -> Result<CheckReport> {
    let session = FormSession::open(backend, form_id)
        .with_context(|| format!("check form {form_id:?}"))?;
    let pagination = session.store().pagination();
    Ok(CheckReport {
        form_id: form_id.to_owned(),
        fields: session.schema().fields().len(),
        total_records: pagination.total_records,
        total_pages: pagination.total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::{build_client, check};
    use crate::config::Config;
    use anyhow::{Result, anyhow};
    use dynaform_testkit::{FakeBackend, INVOICE_FORM};
    use std::thread;
    use tiny_http::{Header, Response, Server};

    #[test]
    fn check_reports_schema_and_totals() -> Result<()> {
        let mut backend = FakeBackend::invoices(121, 50);
        let report = check(&mut backend, INVOICE_FORM)?;
        assert_eq!(report.fields, 9);
        assert_eq!(report.total_records, 121);
        assert_eq!(report.total_pages, 3);
        assert_eq!(
            report.to_string(),
            "form invoice_form: 9 fields, 121 records, 3 pages"
        );
        Ok(())
    }

    #[test]
    fn check_surfaces_transport_failures() {
        let mut backend = FakeBackend::invoices(3, 50);
        backend.fail_next("connection reset");
        let error = check(&mut backend, INVOICE_FORM).expect_err("init should fail");
        assert!(format!("{error:#}").contains("connection reset"));
    }

    #[test]
    fn missing_token_variable_is_reported() -> Result<()> {
        let (_temp, path) = dynaform_testkit::temp_config_path()?;
        std::fs::write(
            &path,
            "version = 1\n[session]\ntoken_env = \"DYNAFORM_TEST_TOKEN_THAT_IS_NEVER_SET\"\n",
        )?;
        let config = Config::load(&path)?;
        let error = build_client(&config).expect_err("unset token variable should fail");
        assert!(
            error
                .to_string()
                .contains("DYNAFORM_TEST_TOKEN_THAT_IS_NEVER_SET")
        );
        Ok(())
    }

    #[test]
    fn check_runs_against_configured_server() -> Result<()> {
        let server =
            Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
        let base_url = format!("http://{}/forms", server.server_addr());

        let handle = thread::spawn(move || {
            let replies = [
                r#"{"fields":[{"fieldName":"id","label":"Id","type":"integer","keyfield":true},{"fieldName":"name","label":"Name","type":"text"}],"itemsPerPage":10}"#,
                r#"{"records":[{"id":1,"name":"first"}],"maxRecords":31,"pageCount":4}"#,
            ];
            let mut urls = Vec::new();
            for body in replies {
                let request = server.recv().expect("request expected");
                urls.push(request.url().to_owned());
                let response = Response::from_string(body).with_header(
                    Header::from_bytes("Content-Type", "application/json")
                        .expect("valid content type header"),
                );
                request.respond(response).expect("response should succeed");
            }
            urls
        });

        let (_temp, path) = dynaform_testkit::temp_config_path()?;
        std::fs::write(
            &path,
            format!("version = 1\n[server]\nbase_url = \"{base_url}\"\ntimeout = \"2s\"\n"),
        )?;
        let config = Config::load(&path)?;
        let mut client = build_client(&config)?;
        let report = check(&mut client, "people")?;
        assert_eq!(report.fields, 2);
        assert_eq!(report.total_records, 31);
        assert_eq!(report.total_pages, 4);

        let urls = handle.join().expect("server thread should join");
        assert_eq!(urls[0], "/forms/init?form=people");
        assert!(urls[1].starts_with("/forms/loaddata?form=people&page=1&limit=10"));
        Ok(())
    }
}
