mod support;

mod render_tests;
mod template_cache_tests;
