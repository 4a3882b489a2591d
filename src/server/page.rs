//! Browser form served at `/`

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Servicio de Traducción</title>
    <script>
        async function sendTranslation(event) {
            event.preventDefault();
            const text = document.getElementById("inputText").value;
            const lang = document.getElementById("languageSelect").value;
            const result = document.getElementById("translationResult");

            const response = await fetch("/translate", {
                method: "POST",
                headers: { "Content-Type": "application/json" },
                body: JSON.stringify({ text: text, lang: lang })
            });

            const data = await response.json();
            result.innerText = response.ok
                ? `Traducción: ${data.translation}`
                : `Error: ${data.error}`;
        }
    </script>
</head>
<body>
    <div style="max-width: 600px; margin: 0 auto; text-align: center;">
        <h1>Servicio de Traducción</h1>
        <form id="translationForm" action="/translate" method="post" onsubmit="sendTranslation(event)">
            <label for="languageSelect">Selecciona el idioma de entrada:</label>
            <select id="languageSelect" name="lang">
"#;

const PAGE_TAIL: &str = r#"            </select>
            <br><br>
            <textarea id="inputText" name="text" rows="4" cols="50" placeholder="Escribe el texto aquí..."></textarea>
            <br><br>
            <button type="submit">Traducir</button>
        </form>
        <p id="translationResult" style="margin-top: 20px; font-size: 18px; font-weight: bold;"></p>
    </div>
</body>
</html>
"#;

fn language_name(code: &str) -> String {
    match code {
        "en" => "Inglés".to_string(),
        "es" => "Español".to_string(),
        "fr" => "Francés".to_string(),
        "de" => "Alemán".to_string(),
        "it" => "Italiano".to_string(),
        "pt" => "Portugués".to_string(),
        other => other.to_uppercase(),
    }
}

fn option_label(key: &str) -> String {
    match key.split_once('-') {
        Some((source, target)) => {
            format!("{} → {}", language_name(source), language_name(target))
        }
        None => key.to_string(),
    }
}

/// Render the form with one `<option>` per registered language pair
pub fn render_index(keys: &[String]) -> String {
    let mut page = String::from(PAGE_HEAD);
    for key in keys {
        page.push_str(&format!(
            "                <option value=\"{}\">{}</option>\n",
            key,
            option_label(key)
        ));
    }
    page.push_str(PAGE_TAIL);
    page
}
