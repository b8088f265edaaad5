// src/block_page.rs
// HTML block page shown to denied requests.

use crate::decision::Block;

pub fn render_block_page(block: &Block) -> String {
    BLOCK_PAGE_HTML.replace("{{code}}", &block.code.to_string())
}

const BLOCK_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>Access Blocked</title>
  <style>
    body { font-family: sans-serif; background: #f9f9f9; margin: 2em; }
    .block-container { background: #fff; padding: 2em; border-radius: 8px; box-shadow: 0 2px 8px #ccc; max-width: 480px; margin: auto; }
    h1 { color: #c00; }
    .code { color: #888; font-size: 0.85em; }
  </style>
</head>
<body>
  <div class="block-container">
    <h1>Access Blocked</h1>
    <p>Your request matched a security rule and has been blocked.</p>
    <p>If you believe this is an error, please contact the site administrator.</p>
    <p class="code">reference {{code}}</p>
  </div>
</body>
</html>
"#;
