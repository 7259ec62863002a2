use crate::classfile::ClassFormatError;

/// `java/lang/String` → `java.lang.String`.
pub fn internal_to_binary(name: &str) -> String {
    name.replace('/', ".")
}

/// Field descriptor (`[Ljava/lang/String;`) → Java type name (`java.lang.String[]`).
pub fn parse_field_descriptor(desc: &str) -> Result<String, ClassFormatError> {
    let (ty, rest) = parse_field_type(desc)?;
    if !rest.is_empty() {
        return Err(ClassFormatError::InvalidDescriptor(desc.to_string()));
    }
    Ok(ty)
}

/// Method descriptor → (parameter type names, return type name).
pub fn parse_method_descriptor(desc: &str) -> Result<(Vec<String>, String), ClassFormatError> {
    let Some(mut rest) = desc.strip_prefix('(') else {
        return Err(ClassFormatError::InvalidDescriptor(desc.to_string()));
    };

    let mut params = Vec::new();
    loop {
        if let Some(after) = rest.strip_prefix(')') {
            rest = after;
            break;
        }
        if rest.is_empty() {
            return Err(ClassFormatError::InvalidDescriptor(desc.to_string()));
        }
        let (param, after) = parse_field_type(rest)?;
        params.push(param);
        rest = after;
    }

    let return_type = if rest == "V" {
        "void".to_string()
    } else {
        parse_field_descriptor(rest).map_err(|_| ClassFormatError::InvalidDescriptor(desc.to_string()))?
    };
    Ok((params, return_type))
}

/// Number of local variable slots a parameter of this type occupies.
pub fn slot_size(type_name: &str) -> usize {
    if type_name == "long" || type_name == "double" { 2 } else { 1 }
}

fn parse_field_type(input: &str) -> Result<(String, &str), ClassFormatError> {
    let Some(first) = input.chars().next() else {
        return Err(ClassFormatError::InvalidDescriptor(input.to_string()));
    };
    let primitive = match first {
        'B' => Some("byte"),
        'C' => Some("char"),
        'D' => Some("double"),
        'F' => Some("float"),
        'I' => Some("int"),
        'J' => Some("long"),
        'S' => Some("short"),
        'Z' => Some("boolean"),
        _ => None,
    };
    if let Some(p) = primitive {
        return Ok((p.to_string(), &input[1..]));
    }
    match first {
        'L' => match input.find(';') {
            Some(end) => Ok((internal_to_binary(&input[1..end]), &input[end + 1..])),
            None => Err(ClassFormatError::InvalidDescriptor(input.to_string())),
        },
        '[' => {
            let (component, rest) = parse_field_type(&input[1..])?;
            Ok((format!("{component}[]"), rest))
        }
        _ => Err(ClassFormatError::InvalidDescriptor(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_descriptors_map_to_java_names() {
        assert_eq!(parse_field_descriptor("I").unwrap(), "int");
        assert_eq!(
            parse_field_descriptor("[[Ljava/lang/String;").unwrap(),
            "java.lang.String[][]"
        );
        assert!(parse_field_descriptor("Ljava/lang/String").is_err());
    }

    #[test]
    fn method_descriptor_splits_params_and_return() {
        let (params, ret) = parse_method_descriptor("(IJLjava/lang/Object;[B)V").unwrap();
        assert_eq!(params, vec!["int", "long", "java.lang.Object", "byte[]"]);
        assert_eq!(ret, "void");

        let (params, ret) = parse_method_descriptor("()Ljava/util/List;").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret, "java.util.List");
    }
}
