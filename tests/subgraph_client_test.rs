use dao_chat::dao_data::{DaoDataProvider, DataError, SubgraphClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DAO: &str = "0x220e41499cf4d93a3629a5509410cbf9e6e0b109";

#[tokio::test]
async fn test_get_dao() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": DAO } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "dao": {
                "name": "Yellow Collective",
                "symbol": "YELLOW",
                "projectURI": "https://yellowcollective.xyz",
                "description": "Yellow",
                "contractImage": "ipfs://bafylogo",
                "totalSupply": 420,
                "ownerCount": 180,
                "proposalCount": 64,
                "totalAuctionSales": "12345000000000000000"
            } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SubgraphClient::new(server.uri());
    let dao = client.get_dao(DAO).await.unwrap();
    assert_eq!(dao.name, "Yellow Collective");
    assert_eq!(dao.project_uri, "https://yellowcollective.xyz");
    assert_eq!(dao.owner_count, 180);
}

#[tokio::test]
async fn test_get_auction_sends_composite_key() {
    let server = MockServer::start().await;
    let key = format!("{}:350", DAO);
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": key } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "auction": {
                "id": key,
                "startTime": "1700000000",
                "endTime": "1700086400",
                "bidCount": 4,
                "firstBidTime": "1700000100",
                "highestBid": { "id": "b4", "amount": "250000000000000000", "bidTime": "1700080000", "bidder": "0xabc" },
                "winningBid": { "amount": "250000000000000000", "bidder": "0xabc" },
                "token": { "name": "Yellow #350", "image": "ipfs://img" }
            } }
        })))
        .mount(&server)
        .await;

    let client = SubgraphClient::new(server.uri());
    let auction = client.get_auction(&key).await.unwrap();
    assert_eq!(auction.bid_count, 4);
    assert_eq!(auction.winning_bid.unwrap().amount, "250000000000000000");
}

#[tokio::test]
async fn test_missing_entities_are_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "number": 9999 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "proposals": [] } })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": format!("{}:99999", DAO) } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "auction": null } })))
        .mount(&server)
        .await;

    let client = SubgraphClient::new(server.uri());
    assert!(matches!(client.get_proposal(DAO, 9999).await, Err(DataError::NotFound(_))));
    assert!(matches!(
        client.get_auction(&format!("{}:99999", DAO)).await,
        Err(DataError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_current_auction_with_null_highest_bid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "dao": { "currentAuction": {
                "id": format!("{}:400", DAO),
                "startTime": "1700000000",
                "endTime": "1700086400",
                "bidCount": 0,
                "firstBidTime": null,
                "highestBid": null,
                "token": { "name": "Yellow #400", "image": "" }
            } } }
        })))
        .mount(&server)
        .await;

    let auction = SubgraphClient::new(server.uri()).get_current_auction(DAO).await.unwrap();
    assert!(auction.highest_bid.is_none());
    assert_eq!(auction.token.name, "Yellow #400");
}

#[tokio::test]
async fn test_http_and_graphql_errors_are_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": "0xdown" } })))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": "0xbroken" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "indexing_error" }]
        })))
        .mount(&server)
        .await;

    let client = SubgraphClient::new(server.uri());
    match client.get_dao("0xdown").await {
        Err(DataError::Unavailable(message)) => assert!(message.contains("503")),
        other => panic!("unexpected {:?}", other),
    }
    match client.get_dao("0xbroken").await {
        Err(DataError::Unavailable(message)) => assert!(message.contains("indexing_error")),
        other => panic!("unexpected {:?}", other),
    }
}
