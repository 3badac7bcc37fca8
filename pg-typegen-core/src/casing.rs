use heck::{ToSnakeCase, ToUpperCamelCase};

/// Converts a database identifier like `user_status` or `userStatus` to `UserStatus`.
pub fn to_pascal(name: &str) -> String {
    name.to_upper_camel_case()
}

/// Converts `FindUserByID` or `first-name` to `find_user_by_id` / `first_name`.
pub fn to_snake(name: &str) -> String {
    name.to_snake_case()
}

/// Whether `name` is usable as an identifier without further escaping.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_from_snake_and_camel() {
        assert_eq!(to_pascal("user_status"), "UserStatus");
        assert_eq!(to_pascal("device_type"), "DeviceType");
        assert_eq!(to_pascal("userStatus"), "UserStatus");
        assert_eq!(to_pascal("some table"), "SomeTable");
        assert_eq!(to_pascal("ios"), "Ios");
        assert_eq!(to_pascal("UPPER_CASE"), "UpperCase");
        assert_eq!(to_pascal(""), "");
    }

    #[test]
    fn snake_from_query_names() {
        assert_eq!(to_snake("FindUserByID"), "find_user_by_id");
        assert_eq!(to_snake("ListAuthors"), "list_authors");
        assert_eq!(to_snake("first-name"), "first_name");
        assert_eq!(to_snake("already_snake"), "already_snake");
        assert_eq!(to_snake("XMLHttpRequest"), "xml_http_request");
        assert_eq!(to_snake("ID"), "id");
        assert_eq!(to_snake("?column?"), "column");
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("FindUserByID"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
