use std::collections::HashMap;

use chrono::Utc;
use email_service::{
    models::template::Template,
    utils::{render_template, replace_variables, template_variables},
};
use serde_json::{Value, json};

fn template(subject: &str, html: &str) -> Template {
    Template {
        id: 7,
        name: "welcome".to_string(),
        description: None,
        subject: subject.to_string(),
        html_content: html.to_string(),
        variables: vec!["user_name".to_string(), "code".to_string()],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn data(value: Value) -> HashMap<String, Value> {
    serde_json::from_value(value).unwrap()
}

#[test]
fn renders_recipient_fields_and_data() {
    let template = template(
        "Welcome {{user_name}}",
        "<p>Hi {{user_name}}, your code is {{code}}. Reply to {{user_email}}.</p>",
    );
    let variables = template_variables("Ada", "ada@example.com", &data(json!({"code": "4711"})));

    let rendered = render_template(&template, &variables);

    assert_eq!(rendered.subject, "Welcome Ada");
    assert_eq!(
        rendered.html,
        "<p>Hi Ada, your code is 4711. Reply to ada@example.com.</p>"
    );
}

#[test]
fn request_data_overrides_recipient_fields() {
    let variables = template_variables(
        "Ada",
        "ada@example.com",
        &data(json!({"user_name": "Countess"})),
    );

    assert_eq!(
        replace_variables("Dear {{user_name}}", &variables),
        "Dear Countess"
    );
}

#[test]
fn unknown_placeholders_are_left_alone() {
    let variables = data(json!({"name": "Ada"}));

    assert_eq!(
        replace_variables("{{name}} owes {{amount}}", &variables),
        "Ada owes {{amount}}"
    );
    assert_eq!(replace_variables("{{name", &variables), "{{name");
}

#[test]
fn every_occurrence_is_replaced() {
    let variables = data(json!({"x": "1"}));

    assert_eq!(replace_variables("{{x}}+{{x}}={{x}}{{x}}", &variables), "1+1=11");
}

#[test]
fn non_string_values_render_as_json_text() {
    let variables = data(json!({
        "count": 3,
        "ratio": 0.5,
        "flag": true,
        "missing": null,
        "tags": ["a", "b"],
    }));

    assert_eq!(
        replace_variables("{{count}}|{{ratio}}|{{flag}}|{{missing}}|{{tags}}", &variables),
        "3|0.5|true||[\"a\",\"b\"]"
    );
}

#[test]
fn substituted_values_are_not_rescanned() {
    let variables = data(json!({"a": "{{b}}", "b": "B"}));

    assert_eq!(replace_variables("{{a}} {{b}}", &variables), "{{b}} B");
}

#[test]
fn extra_braces_around_a_placeholder_are_kept() {
    let variables = data(json!({"name": "Ada"}));

    assert_eq!(replace_variables("{{{name}}}", &variables), "{Ada}");
}

#[test]
fn text_without_placeholders_is_unchanged() {
    let variables = data(json!({"name": "Ada"}));

    assert_eq!(
        replace_variables("Plain text ünïcødé {}", &variables),
        "Plain text ünïcødé {}"
    );
}
