use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use dialoguer::{Input, Select};

use crate::config::{self, Config, SpotifyConfig};
use crate::core::browser::{ChromeSession, SleepPacer};
use crate::core::converter::{ConverterDriver, RunReport};
use crate::core::resolver::MatchResolver;
use crate::models::Playlist;
use crate::sources::apple_music::AppleMusicScraper;
use crate::sources::spotify::SpotifyClient;
use crate::sources::youtube::YouTubeSearch;
use crate::sources::{PlaylistLookup, PlaylistSource};

const SERVICES: [&str; 2] = ["Spotify", "Apple Music"];

#[derive(Parser)]
#[command(
    name = "playlist2mp3",
    about = "Spotify/Apple Music 플레이리스트를 YouTube에서 찾아 MP3로 내려받습니다"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 설정 파일 경로 (기본: ~/.config/playlist2mp3/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 브라우저를 화면 없이 실행
    #[arg(long)]
    pub headless: bool,

    /// 트랙 목록만 출력하고 다운로드는 하지 않음
    #[arg(long)]
    pub no_download: bool,

    /// 디버그 로그 출력
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spotify 자격증명 설정
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    match cli.command {
        Some(Commands::Config) => cmd_config(&config_path),
        None => cmd_run(&cli, &config_path),
    }
}

fn cmd_run(cli: &Cli, config_path: &Path) -> Result<()> {
    let mut cfg = config::load_config(config_path);
    if cli.headless {
        cfg.converter.headless = true;
    }

    let service = Select::new()
        .with_prompt("음악 서비스를 선택하세요")
        .items(&SERVICES)
        .default(0)
        .interact()?;

    let source: Box<dyn PlaylistSource> = match service {
        0 => {
            if !cfg.spotify.is_configured() {
                println!("Spotify가 설정되지 않았습니다. 먼저 'playlist2mp3 config'를 실행하세요.");
                return Ok(());
            }
            let cache = config::token_cache_path(config_path);
            Box::new(SpotifyClient::connect(&cfg.spotify, &cache, prompt_redirect)?)
        }
        _ => Box::new(AppleMusicScraper::new(
            cfg.converter.headless,
            cfg.apple_music.marker_timeout(),
        )),
    };

    let mut playlist = match choose_playlist(source.as_ref())? {
        Some(playlist) => playlist,
        None => return Ok(()),
    };

    if playlist.tracks.is_empty() {
        println!("플레이리스트에 트랙이 없습니다.");
        return Ok(());
    }

    let index = YouTubeSearch::new()?;
    let resolver = MatchResolver::new(&index, &SleepPacer, &cfg.search);
    resolver.resolve_all(&mut playlist);

    println!("\n선택한 플레이리스트의 트랙:");
    print_tracks(&playlist);

    if cli.no_download {
        return Ok(());
    }

    let report = download_all(&cfg, &playlist)?;
    print_report(&report);
    Ok(())
}

fn choose_playlist(source: &dyn PlaylistSource) -> Result<Option<Playlist>> {
    let id = match source.lookup() {
        PlaylistLookup::Listed => {
            let playlists = source.list_playlists()?;
            if playlists.is_empty() {
                println!("{}에 플레이리스트가 없습니다.", source.name());
                return Ok(None);
            }
            let names: Vec<String> = playlists
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}. {}", i + 1, p.name))
                .collect();
            let selection = Select::new()
                .with_prompt("플레이리스트를 선택하세요")
                .items(&names)
                .default(0)
                .interact()?;
            playlists[selection].id.clone()
        }
        PlaylistLookup::ByUrl => Input::<String>::new()
            .with_prompt(format!("{} 플레이리스트 URL을 입력하세요", source.name()))
            .interact_text()?,
    };

    match source.fetch_playlist(&id) {
        Ok(playlist) => Ok(Some(playlist)),
        Err(e) => {
            log::error!("error fetching {} playlist '{}': {:#}", source.name(), id, e);
            println!("{} 플레이리스트를 가져오지 못했습니다.", source.name());
            Ok(None)
        }
    }
}

fn prompt_redirect(auth_url: &str) -> Result<String> {
    println!("\n브라우저에서 다음 URL을 열어 Spotify 접근을 허용하세요:");
    println!("{}\n", auth_url);
    let redirected: String = Input::new()
        .with_prompt("리다이렉트된 URL을 붙여넣으세요")
        .interact_text()?;
    Ok(redirected)
}

/// 변환 사이트용 브라우저 세션은 실행 동안 하나만 열어 재사용한다.
fn download_all(cfg: &Config, playlist: &Playlist) -> Result<RunReport> {
    let session = ChromeSession::launch(cfg.converter.headless)?;
    let mut driver = ConverterDriver::new(&session, &SleepPacer, &cfg.converter);
    Ok(driver.run(playlist))
}

fn print_tracks(playlist: &Playlist) {
    let mut table = Table::new();
    table.set_header(vec!["#", "제목", "아티스트", "YouTube"]);

    for track in &playlist.tracks {
        table.add_row(vec![
            Cell::new(track.display_position()),
            Cell::new(&track.name),
            Cell::new(track.artist_line()),
            Cell::new(track.display_match()),
        ]);
    }

    match &playlist.curator {
        Some(curator) => println!("{} ({})", playlist.name, curator),
        None => println!("{}", playlist.name),
    }
    println!("{table}");

    let found = playlist
        .tracks
        .iter()
        .filter(|t| t.video_link().is_some())
        .count();
    println!(
        "\n총 {} 트랙 (링크 있음: {}, 없음: {})",
        playlist.tracks.len(),
        found,
        playlist.tracks.len() - found
    );
}

fn print_report(report: &RunReport) {
    println!(
        "\n완료! 다운로드 시작: {}, 실패: {}, 건너뜀: {}",
        report.downloaded,
        report.failed(),
        report.skipped
    );
    for failure in &report.failures {
        println!("  실패 [{}] {}: {}", failure.state, failure.track, failure.message);
    }
}

fn cmd_config(config_path: &Path) -> Result<()> {
    let mut cfg = config::load_config(config_path);

    println!("Spotify API 설정");
    println!("(자격증명은 https://developer.spotify.com/dashboard 에서 발급받으세요)\n");

    let current_id = cfg.spotify.client_id.clone().unwrap_or_default();

    let client_id: String = Input::new()
        .with_prompt("Client ID")
        .with_initial_text(current_id)
        .interact_text()?;

    let current_secret = cfg.spotify.client_secret.clone().unwrap_or_default();

    let client_secret: String = Input::new()
        .with_prompt("Client Secret")
        .with_initial_text(current_secret)
        .interact_text()?;

    let redirect_uri: String = Input::new()
        .with_prompt("Redirect URI")
        .with_initial_text(cfg.spotify.redirect_uri.clone())
        .interact_text()?;

    cfg.spotify = SpotifyConfig {
        client_id: Some(client_id),
        client_secret: Some(client_secret),
        redirect_uri,
    };

    config::save_config(config_path, &cfg)?;
    // 자격증명이 바뀌면 이전 토큰은 쓸 수 없다.
    let token_path = config::token_cache_path(config_path);
    if token_path.exists() {
        if let Err(e) = std::fs::remove_file(&token_path) {
            log::warn!("cannot remove stale token {}: {}", token_path.display(), e);
        }
    }
    println!("\n설정이 저장되었습니다: {}", config_path.display());
    Ok(())
}
