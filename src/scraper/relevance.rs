use super::keywords::KeywordTables;

/// Significant lower-case words of a search query
pub fn query_words(query: &str, tables: &KeywordTables) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| word.chars().count() > 2 && !tables.is_stop_word(word))
        .map(str::to_string)
        .collect()
}

/// Decide whether a scraped product name plausibly answers the query.
///
/// Category rules run first: a conflicting term in the product that the query
/// does not mention rejects it, a synonym accepts it. Anything the rules leave
/// open falls through to a word-overlap score.
pub fn is_product_relevant(query: &str, product_name: &str, tables: &KeywordTables) -> bool {
    let query_lower = query.to_lowercase();
    let product_lower = product_name.to_lowercase();
    let words = query_words(query, tables);

    for rule in &tables.category_rules {
        if !words.iter().any(|w| *w == rule.category) {
            continue;
        }

        let conflicting = rule
            .conflicts
            .iter()
            .any(|c| product_lower.contains(c.as_str()) && !query_lower.contains(c.as_str()));
        if conflicting {
            return false;
        }

        if rule.synonyms.iter().any(|s| product_lower.contains(s.as_str())) {
            return true;
        }
    }

    let mut score = 0.0;
    for word in &words {
        if product_lower.contains(word.as_str()) {
            score += 1.0;
        }

        let len = word.chars().count();
        if len > 4 {
            let prefix: String = word.chars().take(len * 7 / 10).collect();
            if product_lower.contains(prefix.as_str()) {
                score += 0.5;
            }
        }
    }

    let threshold = f64::max(1.0, words.len() as f64 * 0.5);
    score >= threshold
}
