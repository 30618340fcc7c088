//! `{environment}`, `{instanceName}` and `{instanceNumber}` placeholders in
//! channel names. Token names match case-insensitively.

const ENVIRONMENT: &str = "{environment}";
const INSTANCE_NAME: &str = "{instancename}";
const INSTANCE_NUMBER: &str = "{instancenumber}";

pub fn substitute_channel_name(
    name: &str,
    environment: &str,
    instance_name: &str,
    instance_number: u32,
) -> String {
    let number = instance_number.to_string();
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let Some(end) = candidate.find('}') else {
            out.push_str(candidate);
            return out;
        };
        let token = &candidate[..=end];
        let replacement = match token.to_ascii_lowercase().as_str() {
            ENVIRONMENT => Some(environment),
            INSTANCE_NAME => Some(instance_name),
            INSTANCE_NUMBER => Some(number.as_str()),
            _ => None,
        };
        match replacement {
            Some(value) => out.push_str(value),
            None => out.push_str(token),
        }
        rest = &candidate[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_tokens() {
        assert_eq!(
            substitute_channel_name("{environment}-{instanceName}-{instanceNumber}", "prod", "api", 2),
            "prod-api-2"
        );
        assert_eq!(substitute_channel_name("{ENVIRONMENT}_orders", "qa", "x", 0), "qa_orders");
    }

    #[test]
    fn leaves_everything_else_alone() {
        assert_eq!(substitute_channel_name("orders", "prod", "api", 1), "orders");
        assert_eq!(substitute_channel_name("{region}-orders", "prod", "api", 1), "{region}-orders");
        assert_eq!(substitute_channel_name("orders-{environment", "prod", "api", 1), "orders-{environment");
    }
}
