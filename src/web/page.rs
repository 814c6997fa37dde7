//! Operator landing page

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>G1 Webcam</title>
  </head>
  <body>
    <h1>G1 Webcam</h1>
    <img src="/video" width="640" height="480" alt="camera stream" />
  </body>
</html>
"#;
