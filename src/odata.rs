//! Business Central OData v4 addressing and response decoding

use serde_json::Value;

use crate::config::GlobalConfig;
use crate::context::Context;

/// Builds request URLs of the form
/// `{base}/{version}/{tenant}/{environment}/ODataV4/Company('{company}')/{api}`
#[derive(Debug, Clone, PartialEq)]
pub struct ODataEndpoint {
    base_url: String,
    api_version: String,
    tenant_id: String,
}

impl ODataEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn from_global(global: &GlobalConfig) -> Self {
        Self::new(&global.api_base_url, &global.api_version, &global.tenant_id)
    }

    pub fn url(&self, ctx: &Context) -> String {
        format!(
            "{}/{}/{}/{}/ODataV4/Company('{}')/{}",
            self.base_url,
            self.api_version,
            self.tenant_id,
            urlencoding::encode(&ctx.environment),
            company_literal(&ctx.company),
            urlencoding::encode(&ctx.endpoint),
        )
    }
}

/// Company name as the body of an OData string literal, percent-encoded
fn company_literal(company: &str) -> String {
    urlencoding::encode(&company.replace('\'', "''")).into_owned()
}

/// Record collection extracted from a response body
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub records: Vec<Value>,
    /// Set when the body was not the usual `{"value": [...]}` envelope
    pub coerced: Option<&'static str>,
}

/// Pull the `value` array out of an OData response
///
/// A bare JSON array is taken as the record collection. Any other JSON shape
/// yields no records. Only bodies that are not JSON at all are errors.
pub fn decode_records(body: &str) -> Result<Decoded, serde_json::Error> {
    let payload: Value = serde_json::from_str(body)?;
    let decoded = match payload {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(records)) => Decoded {
                records,
                coerced: None,
            },
            Some(_) => Decoded {
                records: Vec::new(),
                coerced: Some("`value` is not an array; treating as empty"),
            },
            None => Decoded {
                records: Vec::new(),
                coerced: Some("response has no `value` array; treating as empty"),
            },
        },
        Value::Array(records) => Decoded {
            records,
            coerced: Some("response is a bare array; using it as the record list"),
        },
        _ => Decoded {
            records: Vec::new(),
            coerced: Some("response is not a JSON object; treating as empty"),
        },
    };
    Ok(decoded)
}

/// `error.message` of an OData error body, if there is one
pub fn error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
