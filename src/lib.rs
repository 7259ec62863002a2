//! # aop-model
//!
//! Static AOP reference model builder for Spring bean configurations.
//!
//! Reads aspect definitions from `aop` XML and `@AspectJ` annotations,
//! evaluates their pointcuts against the methods of every bean the
//! definitions can see, and keeps the resulting advice → target references
//! per project and configuration file. Nothing is loaded or executed; class
//! metadata comes straight from class files and jars.
//!
//! ## Architecture
//!
//! - **beans**: Spring `<beans>` configurations, inner beans and configuration sets
//! - **classfile** / **descriptor** / **classpath**: class metadata read from directories and jars
//! - **types**: structural class model, type hierarchy and three-valued matching results
//! - **validator**: which classes are usable annotation-style aspects
//! - **definition**: aspect definitions and named pointcut scopes
//! - **xml_definitions** / **annotation_definitions**: definition extractors
//! - **pointcut**: AspectJ pointcut parser and evaluator
//! - **matcher**: per-definition compiled matchers and proxy-eligible methods
//! - **walker**: candidate beans across inner beans and configuration sets
//! - **resolution**: LRU of per-project class resolution contexts
//! - **model** / **builder**: the reference model and the pass that fills it
//! - **diagnostics** / **error**: problem reporting
//! - **store** / **incremental**: persisted results and change detection for the CLI

pub mod annotation_definitions;
pub mod beans;
pub mod builder;
pub mod classfile;
pub mod classpath;
pub mod cli;
pub mod config;
pub mod definition;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod incremental;
pub mod matcher;
pub mod model;
pub mod pointcut;
pub mod resolution;
pub mod store;
pub mod types;
pub mod validator;
pub mod walker;
pub mod xml_definitions;
