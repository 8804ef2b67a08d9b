//! The browser presentation page: an upload form that posts to `/predict`
//! and renders the returned probabilities next to the evaluated crops.

use axum::response::Html;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Bone Scan Analyzer</title>
<style>
:root {
  --bg-primary: #121212;
  --bg-card: #252525;
  --text-primary: #ffffff;
  --text-secondary: #b0b0b0;
  --accent: #4f6df5;
  --border-color: #333333;
}
body {
  background: var(--bg-primary);
  color: var(--text-primary);
  font-family: system-ui, sans-serif;
  max-width: 960px;
  margin: 2rem auto;
  padding: 0 1rem;
}
h1 { font-size: 1.8rem; }
.subtitle { color: var(--text-secondary); margin-bottom: 1.5rem; }
.card {
  background: var(--bg-card);
  border: 1px solid var(--border-color);
  border-radius: 0.5rem;
  padding: 1.5rem;
  margin-bottom: 1rem;
}
button {
  background: var(--accent);
  color: var(--text-primary);
  border: none;
  border-radius: 0.3rem;
  padding: 0.6rem 1.4rem;
  cursor: pointer;
}
#error { color: #f57a6d; }
.regions { display: flex; flex-wrap: wrap; gap: 0.8rem; }
.regions figure { margin: 0; text-align: center; }
.regions img { height: 200px; border: 1px solid var(--border-color); }
.regions figcaption { color: var(--text-secondary); font-size: 0.85rem; }
</style>
</head>
<body>
<h1>Bone Scan Analyzer</h1>
<p class="subtitle">Upload a whole-body bone scan to estimate the probability of metastasis.</p>

<div class="card">
  <form id="upload-form">
    <input type="file" id="scan" name="file" accept=".jpg,.jpeg" required>
    <button type="submit">Analyze</button>
  </form>
</div>

<div class="card" id="result" hidden>
  <h2>Result</h2>
  <p id="summary"></p>
  <p>Probability negative: <span id="prob-negative"></span></p>
  <p>Probability positive: <span id="prob-positive"></span></p>
  <h3>Evaluated regions</h3>
  <div class="regions" id="regions"></div>
</div>

<div class="card" id="error" hidden></div>

<script>
const REGIONS = ["headANT", "chestLANT", "chestRANT", "pelvisANT", "kneeLANT", "kneeRANT"];

document.getElementById("upload-form").addEventListener("submit", async (event) => {
  event.preventDefault();
  const input = document.getElementById("scan");
  if (!input.files.length) return;
  const file = input.files[0];

  const errorCard = document.getElementById("error");
  const resultCard = document.getElementById("result");
  errorCard.hidden = true;
  resultCard.hidden = true;

  const form = new FormData();
  form.append("file", file);
  try {
    const response = await fetch("/predict", { method: "POST", body: form });
    const body = await response.json();
    if (!response.ok) {
      errorCard.textContent = body.detail || "prediction failed";
      errorCard.hidden = false;
      return;
    }
    const positive = body.probability_positive;
    document.getElementById("summary").textContent =
      positive > 0.5 ? "Metastasis suspected" : "No metastasis suspected";
    document.getElementById("prob-negative").textContent = body.probability_negative.toFixed(4);
    document.getElementById("prob-positive").textContent = positive.toFixed(4);

    const container = document.getElementById("regions");
    container.innerHTML = "";
    for (const region of REGIONS) {
      const figure = document.createElement("figure");
      const img = document.createElement("img");
      img.src = `/regions/${region}/${encodeURIComponent(file.name)}`;
      img.alt = region;
      const caption = document.createElement("figcaption");
      caption.textContent = region;
      figure.append(img, caption);
      container.append(figure);
    }
    resultCard.hidden = false;
  } catch (err) {
    errorCard.textContent = `request failed: ${err}`;
    errorCard.hidden = false;
  }
});
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_posts_to_the_prediction_endpoint() {
        assert!(INDEX_HTML.contains("/predict"));
        assert!(INDEX_HTML.contains("upload-form"));
    }

    #[test]
    fn page_lists_all_canonical_regions() {
        for region in bonescan_core::CANONICAL_REGIONS {
            assert!(INDEX_HTML.contains(region.label()), "missing {region}");
        }
    }
}
