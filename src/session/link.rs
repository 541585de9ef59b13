use url::Url;

use crate::engine::GameId;

const GAME_PARAM: &str = "game";

/// Build the invite link the organizer shares: `<origin>?game=<id>`.
pub fn share_link(origin: &Url, game_id: &str) -> Url {
    let mut link = origin.clone();
    link.set_query(None);
    link.query_pairs_mut().append_pair(GAME_PARAM, game_id);
    link
}

/// Extract the game id a visited link carries. Accepts both the plain query
/// form and the hash-routed form (`…#/path?game=<id>`) old clients emit.
pub fn game_id_from_url(url: &Url) -> Option<GameId> {
    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == GAME_PARAM) {
        return Some(id.into_owned());
    }

    let fragment = url.fragment()?;
    let (_, query) = fragment.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == GAME_PARAM)
        .map(|(_, id)| id.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_link_carries_the_game_param() {
        let origin = Url::parse("https://cards.example.com/").unwrap();
        let link = share_link(&origin, "k3x9wq1");
        assert_eq!(link.as_str(), "https://cards.example.com/?game=k3x9wq1");
        assert_eq!(game_id_from_url(&link).as_deref(), Some("k3x9wq1"));
    }

    #[test]
    fn hash_routed_links_still_resolve() {
        let url = Url::parse("https://cards.example.com/#/lobby?game=k3x9wq1").unwrap();
        assert_eq!(game_id_from_url(&url).as_deref(), Some("k3x9wq1"));
    }

    #[test]
    fn links_without_a_game_param_resolve_to_none() {
        let url = Url::parse("https://cards.example.com/?other=1#/lobby").unwrap();
        assert_eq!(game_id_from_url(&url), None);
    }
}
