use clap::Parser;
use cli::{Cli, ClientArgs, Commands, ConnectCmd, ServeCmd};
use smb_handshake::{
    server::AnonymousAuthProvider, session::NtlmAuthenticator, Connection, Server, ServerConfig,
};
use std::{error::Error, sync::Arc};

mod cli;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Negotiate(cmd) => {
            let connection = negotiate(&cmd.client)?;
            print_negotiation(&connection);
        }
        Commands::Connect(cmd) => connect(cmd)?,
        Commands::Serve(cmd) => serve(cmd)?,
    }

    Ok(())
}

fn negotiate(args: &ClientArgs) -> Result<Connection, Box<dyn Error>> {
    let mut connection = Connection::build(&args.server, args.make_connection_config())?;
    let family = connection.connect_and_negotiate()?;
    log::info!("Negotiated {} with {}", family, args.server);
    Ok(connection)
}

fn print_negotiation(connection: &Connection) {
    let Some(state) = connection.negotiation() else {
        return;
    };
    println!("dialect:          {}", state.dialect);
    println!("protocol family:  {}", state.family());
    println!("server guid:      {}", state.server_guid);
    println!("signing required: {}", state.signing_required);
    println!("max read/write:   {}/{}", state.max_read_size, state.max_write_size);
    println!("max transact:     {}", state.max_transact_size);
    if let Some(cipher) = state.encryption_cipher {
        println!("cipher:           {:?}", cipher);
    }
    if let Some(hash) = &state.preauth_hash {
        println!("preauth hash:     {:02x?}", &hash.current_hash()[..8]);
    }
}

fn connect(cmd: &ConnectCmd) -> Result<(), Box<dyn Error>> {
    let mut connection = negotiate(&cmd.client)?;
    print_negotiation(&connection);

    let mut authenticator = NtlmAuthenticator::new(
        &cmd.username,
        cmd.password.clone(),
        cmd.domain.as_deref(),
        hostname(),
    )?;
    let mut session = connection.authenticate(&mut authenticator)?;
    println!("session id:       {:#x}", session.session_id());
    println!("signed:           {}", session.is_signed());
    println!("encrypted:        {}", session.is_encrypted());

    if let Some(share) = &cmd.share {
        let tree_id = session.tree_connect(share)?;
        println!("tree id:          {:#x}", tree_id);
        session.tree_disconnect(tree_id)?;
    }
    session.logoff()?;
    Ok(())
}

fn serve(cmd: &ServeCmd) -> Result<(), Box<dyn Error>> {
    let mut config = ServerConfig {
        signing_required: cmd.require_signing,
        encrypt_data: cmd.encrypt,
        reject_unsupported_dialects: cmd.reject_unsupported,
        ..Default::default()
    };
    config.shares.extend(cmd.share.iter().cloned());
    let server = Server::bind(&cmd.address, config, Arc::new(AnonymousAuthProvider))?;
    println!("listening on {}", server.local_addr()?);
    server.serve()?;
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "smb-handshake".to_string())
}
