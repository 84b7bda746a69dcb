use askama::Template;

use crate::models::FormOperation;

#[derive(Template)]
#[template(path = "form.html")]
pub struct FormTemplate<'a> {
    pub operations: &'a [FormOperation],
    pub path_prefix: &'a str,
    pub app_name: &'static str,
    pub version: &'static str,
    pub emoji_prefix: &'static str,
}
