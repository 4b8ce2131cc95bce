/*
   Keep this around for now, it could be useful, because it allows performing Kubernetes checks
   before actually sending a request and waiting for it to fail.

   Warning: You should be sure that Kubernetes enforces these rules for the request you are trying
   to validate.
*/

// This is adapted from Kubernetes.
// See apimachinery/pkg/util/validation/validation.go, apimachinery/pkg/api/validation/generic.go and pkg/apis/core/validation/validation.go in the Kubernetes source

use std::sync::LazyLock;

use regex::Regex;

const RFC_1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const RFC_1123_SUBDOMAIN_ERROR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";

// This is a subdomain's max length in DNS (RFC 1123)
const RFC_1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

const RFC_1035_LABEL_FMT: &str = "[a-z]([-a-z0-9]*[a-z0-9])?";
const RFC_1035_LABEL_ERR_MSG: &str = "a DNS-1035 label must consist of lower case alphanumeric characters or '-', start with an alphabetic character, and end with an alphanumeric character";

// This is a label's max length in DNS (RFC 1035)
const RFC_1035_LABEL_MAX_LENGTH: usize = 63;

fn rfc_1123_subdomain_fmt() -> String {
    format!("{RFC_1123_LABEL_FMT}(\\.{RFC_1123_LABEL_FMT})*")
}

// Lazily initialized regular expressions
static RFC_1123_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{}$", rfc_1123_subdomain_fmt()))
        .expect("failed to compile RFC 1123 subdomain regex")
});

static RFC_1035_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1035_LABEL_FMT}$")).expect("failed to compile RFC 1035 label regex")
});

/// Returns a formatted error message for maximum length violations.
fn max_len_error(length: usize) -> String {
    format!("must be no more than {length} characters")
}

/// Returns a formatted error message for regex violations.
///
/// # Arguments
///
/// * `msg` - this is the main error message to return
/// * `fmt` - this is the regular expression that did not match the input
/// * `examples` - are optional well, formed examples that would match the regex
fn regex_error(msg: &str, fmt: &str, examples: &[&str]) -> String {
    if examples.is_empty() {
        return format!("{msg} (regex used for validation is '{fmt}')");
    }

    let mut msg = msg.to_string();
    msg.push_str(" (e.g. ");
    for (i, example) in examples.iter().enumerate() {
        if i > 0 {
            msg.push_str(" or ");
        }
        msg.push('\'');
        msg.push_str(example);
        msg.push_str("', ");
    }

    msg.push_str("regex used for validation is '");
    msg.push_str(fmt);
    msg.push_str("')");
    msg
}

/// Tests for a string that conforms to the definition of a subdomain in DNS (RFC 1123).
pub fn is_rfc_1123_subdomain(value: &str) -> Result<(), Vec<String>> {
    let mut errors = vec![];
    if value.len() > RFC_1123_SUBDOMAIN_MAX_LENGTH {
        errors.push(max_len_error(RFC_1123_SUBDOMAIN_MAX_LENGTH))
    }

    if !RFC_1123_SUBDOMAIN_REGEX.is_match(value) {
        errors.push(regex_error(
            RFC_1123_SUBDOMAIN_ERROR_MSG,
            &rfc_1123_subdomain_fmt(),
            &["example.com"],
        ))
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Tests for a string that conforms to the definition of a label in DNS (RFC 1035).
pub fn is_rfc_1035_label(value: &str) -> Result<(), Vec<String>> {
    let mut errors = vec![];
    if value.len() > RFC_1035_LABEL_MAX_LENGTH {
        errors.push(max_len_error(RFC_1035_LABEL_MAX_LENGTH))
    }

    if !RFC_1035_LABEL_REGEX.is_match(value) {
        errors.push(regex_error(
            RFC_1035_LABEL_ERR_MSG,
            RFC_1035_LABEL_FMT,
            &["my-name", "abc-123"],
        ))
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// mask_trailing_dash replaces the final character of a string with a subdomain safe
// value if is a dash.
fn mask_trailing_dash(mut name: String) -> String {
    if name.ends_with('-') {
        name.pop();
        name.push('a');
    }

    name
}

/// name_is_dns_subdomain checks whether the passed in name is a valid
/// DNS subdomain name
///
/// # Arguments
///
/// * `name` - is the name to check for validity
/// * `prefix` - indicates whether `name` is just a prefix (ending in a dash, which would otherwise not be legal at the end)
pub fn name_is_dns_subdomain(name: &str, prefix: bool) -> Result<(), Vec<String>> {
    let mut name = name.to_string();
    if prefix {
        name = mask_trailing_dash(name);
    }

    is_rfc_1123_subdomain(&name)
}

/// name_is_dns_label checks whether the passed in name is a valid DNS label
/// according to RFC 1035.
///
/// # Arguments
///
/// * `name` - is the name to check for validity
/// * `prefix` - indicates whether `name` is just a prefix (ending in a dash, which would otherwise not be legal at the end)
pub fn name_is_dns_label(name: &str, prefix: bool) -> Result<(), Vec<String>> {
    let mut name = name.to_string();
    if prefix {
        name = mask_trailing_dash(name);
    }

    is_rfc_1035_label(&name)
}

/// Validates a namespace name.
///
/// See [`name_is_dns_label`] for more information.
pub fn validate_namespace_name(name: &str, prefix: bool) -> Result<(), Vec<String>> {
    name_is_dns_label(name, prefix)
}
