/// Join key for entity names across listings.
///
/// Lowercase ASCII alphanumerics only, so regional-form spellings such as
/// `Ninetales-Alola`, `ninetales alola` and `Ninetales–Alola` collapse to
/// `ninetalesalola`. Accented letters are folded first (`Flabébé`).
pub fn canonical_name(name: &str) -> String {
    name.chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'é' | 'è' | 'ê' | 'ë' | 'É' => 'e',
        'á' | 'à' | 'â' | 'ä' => 'a',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        _ => c,
    }
}
