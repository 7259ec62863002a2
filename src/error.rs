use crate::classfile::ClassFormatError;

pub type Result<T> = std::result::Result<T, AopError>;

/// Errors raised while extracting definitions, compiling pointcuts or matching.
///
/// The type is `Clone` so that a failed pointcut compilation can be cached and
/// replayed for every candidate of the same definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AopError {
    #[error("class '{class_name}' could not be resolved")]
    UnresolvedType { class_name: String },

    #[error("malformed pointcut expression '{expression}': {reason}")]
    MalformedPointcut { expression: String, reason: String },

    #[error("{context}")]
    Invocation {
        context: String,
        cause: Option<Box<AopError>>,
    },

    #[error("invalid class file for '{class_name}': {source}")]
    ClassFormat {
        class_name: String,
        source: ClassFormatError,
    },

    #[error("invalid XML in {resource}: {message}")]
    Xml { resource: String, message: String },

    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl AopError {
    pub fn unresolved(class_name: impl Into<String>) -> Self {
        AopError::UnresolvedType {
            class_name: class_name.into(),
        }
    }

    pub fn malformed(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        AopError::MalformedPointcut {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl std::fmt::Display, err: &std::io::Error) -> Self {
        AopError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Wraps `self` as the cause of a failure in `context`.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        AopError::Invocation {
            context: context.into(),
            cause: Some(Box::new(self)),
        }
    }

    /// Follows `Invocation` causes down to the innermost error.
    ///
    /// An `Invocation` without a cause is its own root.
    pub fn root_cause(&self) -> &AopError {
        let mut current = self;
        while let AopError::Invocation {
            cause: Some(inner), ..
        } = current
        {
            current = inner;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_invocations() {
        let err = AopError::unresolved("com.example.Missing")
            .wrap("binding pointcut")
            .wrap("constructing matcher");
        assert_eq!(err.root_cause(), &AopError::unresolved("com.example.Missing"));
    }

    #[test]
    fn root_cause_of_bare_invocation_is_itself() {
        let err = AopError::Invocation {
            context: "adapter failed".to_string(),
            cause: None,
        };
        assert_eq!(err.root_cause(), &err);
    }
}
