mod common;

use anyhow::Result;
use aop_model::beans::{BeansConfig, BeansProject};
use aop_model::builder::{BuildReport, CancellationToken, ModelBuilder};
use aop_model::classpath::ClassPathProvider;
use aop_model::definition::AdviceKind;
use aop_model::model::{AopReferenceModel, Member};
use aop_model::resolution::ResolutionCache;
use common::{ACC_ABSTRACT, ACC_PUBLIC, Annotation, ClassFile, temp_dir, write_jar};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BEANS_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<beans xmlns="http://www.springframework.org/schema/beans"
       xmlns:aop="http://www.springframework.org/schema/aop">"#;

fn config(resource: &str, body: &str) -> BeansConfig {
    BeansConfig::parse(resource, format!("{BEANS_HEADER}\n{body}\n</beans>\n")).unwrap()
}

fn worker_classes(dir: &Path) -> Result<()> {
    ClassFile::interface("com.example.Worker")
        .method_with(ACC_PUBLIC | ACC_ABSTRACT, "doWork", "()V", Vec::new())
        .write_to(dir)?;
    ClassFile::new("com.example.Foo")
        .implements("com.example.Worker")
        .method("<init>", "()V")
        .method("doWork", "()V")
        .method("helper", "(I)Ljava/lang/String;")
        .write_to(dir)?;
    Ok(())
}

fn builder_for(project: &str, classpath: Vec<PathBuf>) -> ModelBuilder {
    let mut provider = ClassPathProvider::new();
    provider.set_classpath(project, classpath);
    let cache = ResolutionCache::new(Arc::new(provider), 4);
    ModelBuilder::new(Arc::new(AopReferenceModel::new()), Arc::new(cache))
}

fn assert_clean(report: &BuildReport) {
    let diagnostics: Vec<String> = report.diagnostics().map(|d| d.to_string()).collect();
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
}

#[test]
fn xml_aspect_advises_bean_method_end_to_end() -> Result<()> {
    let classes = temp_dir("e2e");
    worker_classes(&classes)?;
    ClassFile::new("com.example.MyAspect")
        .method("beforeAdvice", "()V")
        .write_to(&classes)?;

    let mut beans = BeansProject::new("shop");
    beans.add_config(config(
        "app.xml",
        r#"    <bean id="myBean" class="com.example.Foo"/>
    <bean id="myAspect" class="com.example.MyAspect"/>
    <aop:config>
        <aop:aspect ref="myAspect">
            <aop:before pointcut="execution(* Foo.doWork())" method="beforeAdvice"/>
        </aop:aspect>
    </aop:config>"#,
    ));

    let builder = builder_for("shop", vec![classes.clone()]);
    let report = builder.build_all(&beans, &CancellationToken::new());
    assert_clean(&report);

    let references = builder.model().project("shop").unwrap().references("app.xml");
    assert_eq!(references.len(), 1);
    let reference = &references[0];
    assert_eq!(reference.kind, AdviceKind::Before);
    assert_eq!(reference.definition.aspect_bean, "myAspect");
    assert_eq!(reference.source.to_string(), "com.example.MyAspect.beforeAdvice()");
    assert_eq!(
        reference.target,
        Member::Method {
            class_name: "com.example.Foo".to_string(),
            name: "doWork".to_string(),
            parameter_types: Vec::new(),
        }
    );
    assert_eq!((reference.target_bean.as_str(), reference.target_line), ("myBean", 4));

    let _ = std::fs::remove_dir_all(&classes);
    Ok(())
}

#[test]
fn advisor_from_jar_yields_one_reference() -> Result<()> {
    let dir = temp_dir("advisor");
    let classes = dir.join("classes");
    worker_classes(&classes)?;
    let jar = dir.join("spring-aop.jar");
    write_jar(
        &jar,
        &[
            ClassFile::interface("org.springframework.aop.MethodBeforeAdvice"),
            ClassFile::new("com.example.TimingAdvice")
                .implements("org.springframework.aop.MethodBeforeAdvice")
                .method(
                    "before",
                    "(Ljava/lang/reflect/Method;[Ljava/lang/Object;Ljava/lang/Object;)V",
                ),
        ],
    )?;

    let mut beans = BeansProject::new("shop");
    beans.add_config(config(
        "app.xml",
        r#"    <bean id="myBean" class="com.example.Foo"/>
    <bean id="timing" class="com.example.TimingAdvice"/>
    <aop:config>
        <aop:advisor advice-ref="timing" pointcut="execution(* com.example..*.doWork(..))"/>
    </aop:config>"#,
    ));

    let builder = builder_for("shop", vec![classes, jar]);
    let report = builder.build_all(&beans, &CancellationToken::new());
    assert_clean(&report);
    assert_eq!(report.resources[0].definitions, 1);

    let references = builder.model().project("shop").unwrap().all_references();
    assert_eq!(references.len(), 1);
    assert_eq!(
        references[0].source.to_string(),
        "com.example.TimingAdvice.before(java.lang.reflect.Method, java.lang.Object[], java.lang.Object)"
    );
    assert_eq!(references[0].target.to_string(), "com.example.Foo.doWork()");

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn autoproxy_aspect_reaches_beans_through_config_set() -> Result<()> {
    let classes = temp_dir("autoproxy");
    worker_classes(&classes)?;
    ClassFile::new("com.example.AuditAspect")
        .annotated(Annotation::new("org.aspectj.lang.annotation.Aspect"))
        .method_with(
            ACC_PUBLIC,
            "audit",
            "()V",
            vec![Annotation::new("org.aspectj.lang.annotation.Before")
                .with("value", "execution(* com.example.Worker.*(..))")],
        )
        .write_to(&classes)?;

    let mut beans = BeansProject::new("shop");
    beans.add_config(config(
        "aspects.xml",
        r#"    <aop:aspectj-autoproxy proxy-target-class="true">
        <aop:include name="audit.*"/>
    </aop:aspectj-autoproxy>
    <bean id="auditAspect" class="com.example.AuditAspect"/>
    <bean id="otherAspect" class="com.example.AuditAspect"/>"#,
    ));
    beans.add_config(config("services.xml", r#"    <bean id="myBean" class="com.example.Foo"/>"#));
    beans.add_config_set("app", &["aspects.xml", "services.xml"]);

    let builder = builder_for("shop", vec![classes.clone()]);
    let report = builder.build_all(&beans, &CancellationToken::new());
    assert_clean(&report);

    let project = builder.model().project("shop").unwrap();
    let references = project.references("aspects.xml");
    assert_eq!(references.len(), 1, "{references:#?}");
    let reference = &references[0];
    assert_eq!(reference.definition.aspect_bean, "auditAspect");
    assert!(reference.definition.proxy_target_class);
    assert_eq!(reference.target_resource, "services.xml");
    assert_eq!(reference.target.to_string(), "com.example.Foo.doWork()");
    assert!(project.references("services.xml").is_empty());

    let _ = std::fs::remove_dir_all(&classes);
    Ok(())
}

#[test]
fn rebuild_after_classpath_invalidation_is_stable() -> Result<()> {
    let classes = temp_dir("rebuild");
    worker_classes(&classes)?;
    ClassFile::new("com.example.MyAspect")
        .method("beforeAdvice", "()V")
        .write_to(&classes)?;

    let mut beans = BeansProject::new("shop");
    beans.add_config(config(
        "app.xml",
        r#"    <bean id="myBean" class="com.example.Foo"/>
    <bean id="myAspect" class="com.example.MyAspect"/>
    <aop:config proxy-target-class="true">
        <aop:pointcut id="work" expression="execution(* com.example.Foo.*(..))"/>
        <aop:aspect ref="myAspect">
            <aop:around pointcut-ref="work" method="beforeAdvice"/>
        </aop:aspect>
    </aop:config>"#,
    ));

    let builder = builder_for("shop", vec![classes.clone()]);
    let token = CancellationToken::new();
    builder.build_all(&beans, &token);
    let first = builder.model().project("shop").unwrap().all_references();
    assert_eq!(first.len(), 2);

    assert!(builder.cache().invalidate("shop"));
    builder.build_all(&beans, &token);
    let second = builder.model().project("shop").unwrap().all_references();
    assert_eq!(first, second);

    let _ = std::fs::remove_dir_all(&classes);
    Ok(())
}
